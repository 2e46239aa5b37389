//! Corrections de post-classification
//!
//! Suite ordonnée de corrections ciblées, chacune rendue en un seul `UPDATE`
//! qui réécrit le label et inscrit son numéro dans la colonne de règle.
//! Le numéro d'une correction est sa position (1-based) dans la suite.
//!
//! L'ordre compte: le prédicat d'une correction peut dépendre des labels
//! écrits par une correction précédente (adjacence à une parcelle `5_1`).
//! Chaque correction est validée séparément, sans rollback global.

use serde::{Deserialize, Serialize};

use crate::code::LandUseCode;
use crate::ident::{escape_like, quote_literal, Ident, TableRef};

fn code(value: &'static str) -> LandUseCode {
    LandUseCode::from_static(value)
}

fn default_target() -> LandUseCode {
    code("5_1")
}

fn default_density_column() -> Ident {
    Ident::from_static("rnpp_200m_mode")
}

fn default_min_density() -> i32 {
    2
}

/// Table corrigée et colonnes utilisées par les corrections
#[derive(Debug, Clone)]
pub struct PostclassTarget {
    pub table: TableRef,
    /// Identifiant des unités (`capakey`)
    pub id_column: Ident,
    pub geom: Ident,
    /// Label de classification (`walousmaj`)
    pub label_column: Ident,
    /// Numéro de la dernière correction appliquée (`postclas_rule`)
    pub rule_column: Ident,
    /// Tableau des codes applicables (`all_hilucs`)
    pub all_codes: Ident,
}

impl PostclassTarget {
    /// Ajout de la colonne de règle, avant la première correction
    pub fn add_rule_column_statement(&self) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} integer",
            self.table, self.rule_column
        )
    }

    /// `UPDATE` des unités qui touchent une unité portant `target`
    fn relabel_touching(&self, target: &LandUseCode, rule: usize, predicate: &str) -> String {
        format!(
            "UPDATE {t} SET {label} = {target}, {rule_col} = {rule} \
             WHERE {id} IN (SELECT DISTINCT a.{id} FROM {t} AS a \
             JOIN (SELECT {g} FROM {t} WHERE {label} = {target}) AS b ON ST_Touches(a.{g}, b.{g}) \
             WHERE {predicate})",
            t = self.table,
            label = self.label_column,
            target = target.literal(),
            rule_col = self.rule_column,
            rule = rule,
            id = self.id_column,
            g = self.geom,
            predicate = predicate,
        )
    }
}

/// Une correction de la suite
pub trait Correction {
    /// Nom court stable (`garden-adjacency`)
    fn name(&self) -> &'static str;

    /// Précondition et effet, pour les logs et `--dry-run`
    fn describe(&self) -> String;

    /// Requête de la correction portant le numéro `rule`
    fn statement(&self, target: &PostclassTarget, rule: usize) -> String;
}

/// Petites parcelles résidentielles mal classées en agriculture
///
/// Label dans `labels`, surface `< max_area`, densité `>= min_density`,
/// aucun code applicable sous `excluded_branch`, et contact avec une unité
/// déjà `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GardenAdjacency {
    #[serde(default = "GardenAdjacency::default_labels")]
    pub labels: Vec<LandUseCode>,
    #[serde(default = "GardenAdjacency::default_max_area")]
    pub max_area: f64,
    #[serde(default = "default_density_column")]
    pub density_column: Ident,
    #[serde(default = "default_min_density")]
    pub min_density: i32,
    #[serde(default = "GardenAdjacency::default_excluded_branch")]
    pub excluded_branch: LandUseCode,
    #[serde(default = "default_target")]
    pub target: LandUseCode,
}

impl GardenAdjacency {
    fn default_labels() -> Vec<LandUseCode> {
        vec![code("1_1"), code("1_1_1")]
    }

    fn default_max_area() -> f64 {
        2500.0
    }

    fn default_excluded_branch() -> LandUseCode {
        code("1_1_1")
    }
}

impl Default for GardenAdjacency {
    fn default() -> Self {
        Self {
            labels: Self::default_labels(),
            max_area: Self::default_max_area(),
            density_column: default_density_column(),
            min_density: default_min_density(),
            excluded_branch: Self::default_excluded_branch(),
            target: default_target(),
        }
    }
}

impl Correction for GardenAdjacency {
    fn name(&self) -> &'static str {
        "garden-adjacency"
    }

    fn describe(&self) -> String {
        let labels: Vec<&str> = self.labels.iter().map(|c| c.as_str()).collect();
        format!(
            "label in [{}], area < {}, {} >= {}, no code under {}, touching {} -> {}",
            labels.join(", "),
            self.max_area,
            self.density_column,
            self.min_density,
            self.excluded_branch,
            self.target,
            self.target
        )
    }

    fn statement(&self, target: &PostclassTarget, rule: usize) -> String {
        let labels: Vec<String> = self.labels.iter().map(|c| c.literal()).collect();
        let pattern = quote_literal(&format!("{}\\_%", escape_like(self.excluded_branch.as_str())));
        let predicate = format!(
            "a.{label} IN ({labels}) AND ST_Area(a.{g}) < {max_area} AND a.{density} >= {min} \
             AND NOT EXISTS (SELECT 1 FROM unnest(a.{all}) AS c WHERE c LIKE {pattern} ESCAPE '\\')",
            label = target.label_column,
            labels = labels.join(", "),
            g = target.geom,
            max_area = self.max_area,
            density = self.density_column,
            min = self.min_density,
            all = target.all_codes,
            pattern = pattern,
        );
        target.relabel_touching(&self.target, rule, &predicate)
    }
}

/// Parcelles dont la seule source est la nature cadastrale
///
/// Un seul code applicable, nature cadastrale `source_label`, label `label`,
/// densité `>= min_density`, contact avec une unité `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleSourceAdjacency {
    #[serde(default = "SingleSourceAdjacency::default_label")]
    pub label: LandUseCode,
    #[serde(default = "SingleSourceAdjacency::default_source_column")]
    pub source_column: Ident,
    #[serde(default = "SingleSourceAdjacency::default_label")]
    pub source_label: LandUseCode,
    #[serde(default = "default_density_column")]
    pub density_column: Ident,
    #[serde(default = "default_min_density")]
    pub min_density: i32,
    #[serde(default = "default_target")]
    pub target: LandUseCode,
}

impl SingleSourceAdjacency {
    fn default_label() -> LandUseCode {
        code("1_1")
    }

    fn default_source_column() -> Ident {
        Ident::from_static("nat_lu_maj")
    }
}

impl Default for SingleSourceAdjacency {
    fn default() -> Self {
        Self {
            label: Self::default_label(),
            source_column: Self::default_source_column(),
            source_label: Self::default_label(),
            density_column: default_density_column(),
            min_density: default_min_density(),
            target: default_target(),
        }
    }
}

impl Correction for SingleSourceAdjacency {
    fn name(&self) -> &'static str {
        "single-source-adjacency"
    }

    fn describe(&self) -> String {
        format!(
            "one applicable code, {} = {}, label {}, {} >= {}, touching {} -> {}",
            self.source_column,
            self.source_label,
            self.label,
            self.density_column,
            self.min_density,
            self.target,
            self.target
        )
    }

    fn statement(&self, target: &PostclassTarget, rule: usize) -> String {
        let predicate = format!(
            "cardinality(a.{all}) = 1 AND a.{source} = {source_label} \
             AND a.{label} = {code} AND a.{density} >= {min}",
            all = target.all_codes,
            source = self.source_column,
            source_label = self.source_label.literal(),
            label = target.label_column,
            code = self.label.literal(),
            density = self.density_column,
            min = self.min_density,
        );
        target.relabel_touching(&self.target, rule, &predicate)
    }
}

/// Subdivision des classes résidentielles selon la densité de population
///
/// `<= 1` → `_D`, `2` → `_C`, `3` → `_B`, `4` → `_A`; au-delà ou sans
/// densité le label est conservé.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidentialDensity {
    #[serde(default = "ResidentialDensity::default_labels")]
    pub labels: Vec<LandUseCode>,
    #[serde(default = "default_density_column")]
    pub density_column: Ident,
}

/// Paliers de densité (comparaison, valeur, suffixe), du plus faible au plus fort
const DENSITY_TIERS: [(&str, i32, &str); 4] = [("<=", 1, "D"), ("=", 2, "C"), ("=", 3, "B"), ("=", 4, "A")];

/// Densité au-delà de laquelle le label est conservé
const MAX_DENSITY: i32 = DENSITY_TIERS[DENSITY_TIERS.len() - 1].1;

impl ResidentialDensity {
    fn default_labels() -> Vec<LandUseCode> {
        vec![code("5_1"), code("5_2")]
    }
}

impl Default for ResidentialDensity {
    fn default() -> Self {
        Self {
            labels: Self::default_labels(),
            density_column: default_density_column(),
        }
    }
}

impl Correction for ResidentialDensity {
    fn name(&self) -> &'static str {
        "residential-density"
    }

    fn describe(&self) -> String {
        let labels: Vec<&str> = self.labels.iter().map(|c| c.as_str()).collect();
        let tiers: Vec<String> = DENSITY_TIERS
            .iter()
            .map(|(op, value, suffix)| format!("{}{} _{}", op, value, suffix))
            .collect();
        format!(
            "label in [{}] subdivided by {} ({})",
            labels.join(", "),
            self.density_column,
            tiers.join(", ")
        )
    }

    fn statement(&self, target: &PostclassTarget, rule: usize) -> String {
        let label = &target.label_column;
        let density = &self.density_column;
        let ladder = |code: &LandUseCode| {
            let mut case = String::from("CASE");
            for (op, value, suffix) in DENSITY_TIERS {
                case.push_str(&format!(
                    " WHEN {} {} {} THEN {}",
                    density,
                    op,
                    value,
                    quote_literal(&format!("{}_{}", code, suffix))
                ));
            }
            case.push_str(&format!(" ELSE {} END", code.literal()));
            case
        };

        let mut case = String::from("CASE");
        for code in &self.labels {
            case.push_str(&format!(" WHEN {} = {} THEN {}", label, code.literal(), ladder(code)));
        }
        case.push_str(&format!(" ELSE {} END", label));

        let labels: Vec<String> = self.labels.iter().map(|c| c.literal()).collect();
        format!(
            "UPDATE {t} SET {label} = ({case}), {rule_col} = {rule} \
             WHERE {label} IN ({labels}) AND {density} <= {max}",
            t = target.table,
            label = label,
            case = case,
            rule_col = target.rule_column,
            rule = rule,
            labels = labels.join(", "),
            density = density,
            max = MAX_DENSITY,
        )
    }
}

/// Correction configurable, désignée par `"stage"` dans la configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    GardenAdjacency(GardenAdjacency),
    SingleSourceAdjacency(SingleSourceAdjacency),
    ResidentialDensity(ResidentialDensity),
}

impl Stage {
    pub fn as_correction(&self) -> &dyn Correction {
        match self {
            Stage::GardenAdjacency(c) => c,
            Stage::SingleSourceAdjacency(c) => c,
            Stage::ResidentialDensity(c) => c,
        }
    }
}

/// Une étape rendue: numéro de règle, nom et requête
#[derive(Debug, Clone)]
pub struct PlannedCorrection {
    pub rule: usize,
    pub name: &'static str,
    pub description: String,
    pub sql: String,
}

/// Suite ordonnée de corrections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Postclassification {
    pub stages: Vec<Stage>,
}

impl Default for Postclassification {
    /// Suite historique: jardins (2 étapes) puis densité résidentielle
    fn default() -> Self {
        Self {
            stages: vec![
                Stage::GardenAdjacency(GardenAdjacency::default()),
                Stage::SingleSourceAdjacency(SingleSourceAdjacency::default()),
                Stage::ResidentialDensity(ResidentialDensity::default()),
            ],
        }
    }
}

impl Postclassification {
    /// Rend chaque correction avec son numéro, dans l'ordre d'exécution
    pub fn plan(&self, target: &PostclassTarget) -> Vec<PlannedCorrection> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                let correction = stage.as_correction();
                PlannedCorrection {
                    rule: i + 1,
                    name: correction.name(),
                    description: correction.describe(),
                    sql: correction.statement(target, i + 1),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> PostclassTarget {
        PostclassTarget {
            table: "results.classif".parse().unwrap(),
            id_column: Ident::new("capakey").unwrap(),
            geom: Ident::new("geom").unwrap(),
            label_column: Ident::new("walousmaj").unwrap(),
            rule_column: Ident::new("postclas_rule").unwrap(),
            all_codes: Ident::new("all_hilucs").unwrap(),
        }
    }

    #[test]
    fn test_add_rule_column() {
        assert_eq!(
            target().add_rule_column_statement(),
            "ALTER TABLE results.classif ADD COLUMN IF NOT EXISTS postclas_rule integer"
        );
    }

    #[test]
    fn test_plan_numbers_stages_in_order() {
        let plan = Postclassification::default().plan(&target());
        let names: Vec<_> = plan.iter().map(|p| (p.rule, p.name)).collect();
        assert_eq!(
            names,
            vec![
                (1, "garden-adjacency"),
                (2, "single-source-adjacency"),
                (3, "residential-density")
            ]
        );
        assert!(plan[0].sql.contains("postclas_rule = 1"));
        assert!(plan[1].sql.contains("postclas_rule = 2"));
        assert!(plan[2].sql.contains("postclas_rule = 3"));
    }

    #[test]
    fn test_garden_adjacency_sql() {
        let sql = GardenAdjacency::default().statement(&target(), 1);
        assert!(sql.starts_with("UPDATE results.classif SET walousmaj = '5_1', postclas_rule = 1 WHERE capakey IN"));
        assert!(sql.contains("JOIN (SELECT geom FROM results.classif WHERE walousmaj = '5_1') AS b ON ST_Touches(a.geom, b.geom)"));
        assert!(sql.contains("a.walousmaj IN ('1_1', '1_1_1')"));
        assert!(sql.contains("ST_Area(a.geom) < 2500"));
        assert!(sql.contains("a.rnpp_200m_mode >= 2"));
        assert!(sql.contains("c LIKE '1\\_1\\_1\\_%' ESCAPE '\\'"));
    }

    #[test]
    fn test_single_source_sql() {
        let sql = SingleSourceAdjacency::default().statement(&target(), 2);
        assert!(sql.contains("cardinality(a.all_hilucs) = 1"));
        assert!(sql.contains("a.nat_lu_maj = '1_1' AND a.walousmaj = '1_1'"));
        assert!(sql.contains("postclas_rule = 2"));
    }

    #[test]
    fn test_residential_density_sql() {
        let sql = ResidentialDensity::default().statement(&target(), 3);
        assert!(sql.contains("WHEN walousmaj = '5_1' THEN CASE WHEN rnpp_200m_mode <= 1 THEN '5_1_D'"));
        assert!(sql.contains("WHEN rnpp_200m_mode = 4 THEN '5_2_A' ELSE '5_2' END"));
        assert!(sql.ends_with("WHERE walousmaj IN ('5_1', '5_2') AND rnpp_200m_mode <= 4"));
    }

    #[test]
    fn test_density_ladder_tiers() {
        let sql = ResidentialDensity::default().statement(&target(), 3);
        assert!(sql.contains(
            "CASE WHEN rnpp_200m_mode <= 1 THEN '5_2_D' WHEN rnpp_200m_mode = 2 THEN '5_2_C' \
             WHEN rnpp_200m_mode = 3 THEN '5_2_B' WHEN rnpp_200m_mode = 4 THEN '5_2_A' ELSE '5_2' END"
        ));
        // Au-delà du dernier palier la ligne n'est pas touchée
        assert!(sql.ends_with("AND rnpp_200m_mode <= 4"));
        assert_eq!(sql.matches("_D'").count(), 2);
    }

    #[test]
    fn test_stage_deserialize() {
        let pc: Postclassification = serde_json::from_str(
            r#"{"stages": [
                {"stage": "garden_adjacency", "max_area": 1000},
                {"stage": "residential_density"}
            ]}"#,
        )
        .unwrap();
        match &pc.stages[0] {
            Stage::GardenAdjacency(g) => {
                assert_eq!(g.max_area, 1000.0);
                assert_eq!(g.min_density, 2);
            }
            other => panic!("unexpected stage {:?}", other),
        }
        let plan = pc.plan(&target());
        assert_eq!(plan[1].rule, 2);
        assert_eq!(plan[1].name, "residential-density");
    }
}
