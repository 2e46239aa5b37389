//! Configuration du pipeline
//!
//! Un fichier JSON (ou le preset embarqué `walous`) décrit les jeux de
//! données, la session GRASS et l'enchaînement des étapes. Les paramètres de
//! connexion ne sont jamais lus ici: voir [`crate::db::pool::DatabaseConfig`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use landuse_sql::classify::DEFAULT_FALLBACK;
use landuse_sql::copy::ColumnDef;
use landuse_sql::join::FinalTable;
use landuse_sql::postclass::Stage;
use landuse_sql::publish::{PublishSpec, UncadastredMerge};
use landuse_sql::{
    ClassificationTarget, DecisionList, Ident, LandUseCode, LegendColumns, LegendMap, OverlayJob,
    Postclassification, PostclassTarget, Rule, TableRef,
};

use crate::error::{IoContext, PipelineError, Result};

/// Configuration principale
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Système de référence des données (EPSG)
    #[serde(default = "default_srid")]
    pub srid: u32,

    /// Nombre de processus transmis aux outils qui le supportent
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub validation_dir: Option<PathBuf>,

    #[serde(default)]
    pub grass: Option<GrassConfig>,

    /// Jeux de données par nom logique
    #[serde(default)]
    pub datasets: BTreeMap<String, Dataset>,

    /// Fichiers de sauvegarde par nom logique
    #[serde(default)]
    pub backups: BTreeMap<String, PathBuf>,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_srid() -> u32 {
    31370
}

fn default_jobs() -> usize {
    1
}

/// Session GRASS GIS
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GrassConfig {
    pub gisbase: PathBuf,
    pub gisdb: PathBuf,
    pub location: String,
    #[serde(default = "default_permanent_mapset")]
    pub permanent_mapset: String,
    #[serde(default)]
    pub pythonlib: Option<PathBuf>,
}

fn default_permanent_mapset() -> String {
    "PERMANENT".to_string()
}

/// Jeu de données à charger
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Dataset {
    /// Table cible (`schema.table`)
    pub table: TableRef,
    pub path: PathBuf,
    /// Colonnes d'un fichier tabulaire, dans l'ordre du fichier
    #[serde(default)]
    pub columns: Option<Vec<ColumnDef>>,
    /// Attribut portant le code d'occupation du sol
    #[serde(default)]
    pub label_attribute: Option<Ident>,
    /// Clé série ajoutée à l'import CSV
    #[serde(default)]
    pub serial: bool,
    /// Encodage de repli si le fichier n'est pas en UTF-8
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Enchaînement des étapes de `run`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub overlays: Vec<OverlayJob>,
    #[serde(default)]
    pub final_table: Option<FinalTable>,
    #[serde(default)]
    pub classification: Option<ClassificationConfig>,
    #[serde(default)]
    pub postclassification: Option<PostclassConfig>,
    #[serde(default)]
    pub legend: Option<LegendConfig>,
    #[serde(default)]
    pub publish: Option<PublishSpec>,
    #[serde(default)]
    pub merge: Option<UncadastredMerge>,
}

/// Classification par liste de décision
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassificationConfig {
    /// Table de statistiques (table finale jointe)
    pub stats: TableRef,
    pub result: TableRef,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default = "default_fallback")]
    pub fallback: LandUseCode,
    #[serde(default = "default_label")]
    pub label: Ident,
    #[serde(default = "default_leaf")]
    pub leaf: Ident,
    /// Utilisateurs recevant tous les droits sur la table résultat
    #[serde(default)]
    pub grant: Vec<Ident>,
}

impl ClassificationConfig {
    pub fn target(&self) -> ClassificationTarget {
        ClassificationTarget {
            result: self.result.clone(),
            stats: self.stats.clone(),
            label_column: self.label.clone(),
            leaf_column: self.leaf.clone(),
            grant: self.grant.clone(),
        }
    }

    pub fn decision_list(&self) -> DecisionList {
        DecisionList::new(self.rules.clone(), self.fallback.clone())
    }
}

/// Corrections de postclassification
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostclassConfig {
    /// Table corrigée (défaut: résultat de la classification)
    #[serde(default)]
    pub table: Option<TableRef>,
    #[serde(default = "default_id")]
    pub id_column: Ident,
    #[serde(default = "default_geom")]
    pub geom: Ident,
    #[serde(default = "default_label")]
    pub label: Ident,
    #[serde(default = "default_rule_column")]
    pub rule_column: Ident,
    #[serde(default = "default_all_codes")]
    pub all_codes: Ident,
    #[serde(default = "default_stages")]
    pub stages: Vec<Stage>,
}

impl PostclassConfig {
    pub fn target(&self, table: TableRef) -> PostclassTarget {
        PostclassTarget {
            table,
            id_column: self.id_column.clone(),
            geom: self.geom.clone(),
            label_column: self.label.clone(),
            rule_column: self.rule_column.clone(),
            all_codes: self.all_codes.clone(),
        }
    }

    pub fn pipeline(&self) -> Postclassification {
        Postclassification {
            stages: self.stages.clone(),
        }
    }
}

/// Conversion de légende HILUCS
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LegendConfig {
    /// Table convertie (défaut: résultat de la classification)
    #[serde(default)]
    pub table: Option<TableRef>,
    #[serde(flatten)]
    pub map: LegendMap,
    #[serde(default = "default_label")]
    pub label: Ident,
    #[serde(default = "default_all_codes")]
    pub all_codes: Ident,
    #[serde(default = "default_single")]
    pub single: Ident,
    #[serde(default = "default_multiple")]
    pub multiple: Ident,
    /// Colonnes de niveaux `<label>_l1..l4`
    #[serde(default = "default_true")]
    pub levels: bool,
}

impl LegendConfig {
    pub fn columns(&self) -> LegendColumns {
        LegendColumns {
            label: self.label.clone(),
            all_codes: self.all_codes.clone(),
            single: self.single.clone(),
            multiple: self.multiple.clone(),
        }
    }
}

fn ident(value: &'static str) -> Ident {
    Ident::from_static(value)
}

fn default_fallback() -> LandUseCode {
    LandUseCode::from_static(DEFAULT_FALLBACK)
}

fn default_label() -> Ident {
    ident("walousmaj")
}

fn default_leaf() -> Ident {
    ident("rulebased_leaf")
}

fn default_id() -> Ident {
    ident("capakey")
}

fn default_geom() -> Ident {
    ident("geom")
}

fn default_rule_column() -> Ident {
    ident("postclas_rule")
}

fn default_all_codes() -> Ident {
    ident("all_hilucs")
}

fn default_single() -> Ident {
    ident("hilucslanduse_1")
}

fn default_multiple() -> Ident {
    ident("hilucslanduse_2")
}

fn default_stages() -> Vec<Stage> {
    Postclassification::default().stages
}

fn default_true() -> bool {
    true
}

/// Presets embarqués
pub const PRESETS: [&str; 1] = ["walous"];

impl Config {
    /// Charge une configuration depuis un fichier
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).io_context(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            PipelineError::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Charge une configuration depuis un preset embarqué
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "walous" => Self::load_embedded(include_str!("presets/walous.json")),
            _ => Err(PipelineError::config(format!(
                "Unknown preset: {}. Use: {}",
                preset,
                PRESETS.join(", ")
            ))),
        }
    }

    /// Preset si le nom est connu, fichier sinon
    pub fn resolve(spec: &str) -> Result<Self> {
        if PRESETS.contains(&spec) {
            Self::from_preset(spec)
        } else {
            Self::load(Path::new(spec))
        }
    }

    fn load_embedded(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::config(format!("Failed to parse embedded config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Vérifications croisées que serde ne fait pas
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(PipelineError::config("jobs must be at least 1"));
        }
        for job in &self.pipeline.overlays {
            job.validate()?;
        }
        if let Some(ref final_table) = self.pipeline.final_table {
            if final_table.joins.is_empty() {
                return Err(PipelineError::config("final_table.joins is empty"));
            }
        }
        for (name, dataset) in &self.datasets {
            if let Some(ref columns) = dataset.columns {
                if columns.is_empty() {
                    return Err(PipelineError::config(format!("Dataset '{}' declares no column", name)));
                }
            }
        }
        let needs_result = self.pipeline.postclassification.as_ref().is_some_and(|p| p.table.is_none())
            || self.pipeline.legend.as_ref().is_some_and(|l| l.table.is_none());
        if needs_result && self.pipeline.classification.is_none() {
            return Err(PipelineError::config(
                "postclassification/legend need a table when no classification is configured",
            ));
        }
        Ok(())
    }

    /// Récupère un jeu de données par son nom logique
    pub fn dataset(&self, name: &str) -> Result<&Dataset> {
        self.datasets.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.datasets.keys().map(String::as_str).collect();
            PipelineError::config(format!(
                "Unknown dataset '{}'. Known: {}",
                name,
                known.join(", ")
            ))
        })
    }

    /// Récupère un fichier de sauvegarde par son nom logique
    pub fn backup(&self, name: &str) -> Result<&Path> {
        self.backups
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| PipelineError::config(format!("Unknown backup '{}'", name)))
    }

    pub fn grass(&self) -> Result<&GrassConfig> {
        self.grass
            .as_ref()
            .ok_or_else(|| PipelineError::config("No 'grass' section in configuration"))
    }

    pub fn classification(&self) -> Result<&ClassificationConfig> {
        self.pipeline
            .classification
            .as_ref()
            .ok_or_else(|| PipelineError::config("No 'pipeline.classification' section in configuration"))
    }

    /// Table des étapes aval: explicite, sinon résultat de la classification
    pub fn result_table(&self, explicit: Option<&TableRef>) -> Result<TableRef> {
        match explicit {
            Some(table) => Ok(table.clone()),
            None => Ok(self.classification()?.result.clone()),
        }
    }
}
