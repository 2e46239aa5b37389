//! Statistiques de superposition par unité de base
//!
//! Trois calculs, chacun produisant une table `<schema overlay>.<base>_<op>_<overlay>`
//! avec une ligne par unité de base intersectée:
//!
//! | opération | table | colonnes |
//! |-----------|-------|----------|
//! | couverture | `<base>_overlay_<o>` | `<id>_<o>`, `<o>_area`, `<o>_coverage` |
//! | comptage | `<base>_count_<o>` | `<id>_<o>`, `<o>_count` |
//! | somme | `<base>_sum_<o>` | `<id>_<o>`, `<col>_tot`, `count_<o>_points` |
//!
//! Avec une colonne de classe, le résultat par classe est pivoté via
//! `crosstab` (extension `tablefunc`) en une colonne par classe distincte.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlError};
use crate::ident::{column_suffix, quote_literal, Ident, SqlType, TableRef};

/// Type de calcul
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    /// Proportion de surface couverte par des polygones
    Coverage,
    /// Nombre de points contenus
    Count,
    /// Somme d'un attribut des points contenus
    Sum,
}

impl OverlayKind {
    fn table_infix(self) -> &'static str {
        match self {
            OverlayKind::Coverage => "overlay",
            OverlayKind::Count => "count",
            OverlayKind::Sum => "sum",
        }
    }
}

impl fmt::Display for OverlayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverlayKind::Coverage => "coverage",
            OverlayKind::Count => "count",
            OverlayKind::Sum => "sum",
        };
        f.write_str(s)
    }
}

/// Agrégat autorisé pour la colonne supplémentaire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Aggregate {
    Sum,
    Min,
    Max,
    Avg,
    Count,
}

impl Aggregate {
    pub fn as_sql(self) -> &'static str {
        match self {
            Aggregate::Sum => "SUM",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
            Aggregate::Avg => "AVG",
            Aggregate::Count => "COUNT",
        }
    }
}

impl FromStr for Aggregate {
    type Err = SqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(Aggregate::Sum),
            "min" => Ok(Aggregate::Min),
            "max" => Ok(Aggregate::Max),
            "avg" => Ok(Aggregate::Avg),
            "count" => Ok(Aggregate::Count),
            _ => Err(SqlError::UnsupportedAggregate(s.to_string())),
        }
    }
}

impl TryFrom<String> for Aggregate {
    type Error = SqlError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Aggregate> for String {
    fn from(value: Aggregate) -> Self {
        value.as_sql().to_lowercase()
    }
}

/// Colonne supplémentaire agrégée sur les polygones superposés (`["surface", "sum"]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Ident, Aggregate)", into = "(Ident, Aggregate)")]
pub struct ExtraColumn {
    pub column: Ident,
    pub aggregate: Aggregate,
}

impl From<(Ident, Aggregate)> for ExtraColumn {
    fn from((column, aggregate): (Ident, Aggregate)) -> Self {
        Self { column, aggregate }
    }
}

impl From<ExtraColumn> for (Ident, Aggregate) {
    fn from(extra: ExtraColumn) -> Self {
        (extra.column, extra.aggregate)
    }
}

fn default_geom() -> Ident {
    Ident::from_static("geom")
}

fn default_id_type() -> SqlType {
    SqlType::from_static("varchar")
}

/// Un calcul de superposition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayJob {
    /// Table des unités de base (`agdp.capa`)
    pub base: TableRef,
    /// Identifiant des unités de base (`capakey`)
    pub base_id: Ident,
    /// Table superposée (`ancillary.sar`)
    pub overlay: TableRef,
    pub kind: OverlayKind,
    /// Colonne de classe: une colonne de sortie par valeur distincte
    #[serde(default)]
    pub class_column: Option<Ident>,
    /// Colonne supplémentaire (couverture uniquement)
    #[serde(default)]
    pub extra: Option<ExtraColumn>,
    /// Colonne sommée (somme uniquement)
    #[serde(default)]
    pub sum_column: Option<Ident>,
    /// Colonne géométrique, identique dans les deux tables
    #[serde(default = "default_geom")]
    pub geom: Ident,
    /// Type de la colonne identifiant dans la table pivotée
    #[serde(default = "default_id_type")]
    pub id_type: SqlType,
}

impl OverlayJob {
    pub fn coverage(base: TableRef, base_id: Ident, overlay: TableRef) -> Self {
        Self::with_kind(base, base_id, overlay, OverlayKind::Coverage)
    }

    pub fn count(base: TableRef, base_id: Ident, overlay: TableRef) -> Self {
        Self::with_kind(base, base_id, overlay, OverlayKind::Count)
    }

    pub fn sum(base: TableRef, base_id: Ident, overlay: TableRef, column: Ident) -> Self {
        let mut job = Self::with_kind(base, base_id, overlay, OverlayKind::Sum);
        job.sum_column = Some(column);
        job
    }

    fn with_kind(base: TableRef, base_id: Ident, overlay: TableRef, kind: OverlayKind) -> Self {
        Self {
            base,
            base_id,
            overlay,
            kind,
            class_column: None,
            extra: None,
            sum_column: None,
            geom: default_geom(),
            id_type: default_id_type(),
        }
    }

    pub fn with_class(mut self, column: Ident) -> Self {
        self.class_column = Some(column);
        self
    }

    pub fn with_extra(mut self, column: Ident, aggregate: Aggregate) -> Self {
        self.extra = Some(ExtraColumn { column, aggregate });
        self
    }

    /// Vérifie la cohérence des options avec le type de calcul
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            OverlayKind::Sum => {
                if self.sum_column.is_none() {
                    return Err(SqlError::Empty("sum column for a sum overlay"));
                }
                if self.class_column.is_some() || self.extra.is_some() {
                    return Err(SqlError::InvalidOverlay {
                        overlay: self.overlay.to_string(),
                        reason: "sum overlays take neither a class column nor an extra column",
                    });
                }
            }
            OverlayKind::Count if self.extra.is_some() => {
                return Err(SqlError::InvalidOverlay {
                    overlay: self.overlay.to_string(),
                    reason: "extra columns are only supported on coverage overlays",
                });
            }
            _ => {}
        }
        if self.class_column.is_some() && self.extra.is_some() {
            return Err(SqlError::InvalidOverlay {
                overlay: self.overlay.to_string(),
                reason: "class pivot and extra column cannot be combined",
            });
        }
        Ok(())
    }

    fn overlay_name(&self) -> &Ident {
        &self.overlay.table
    }

    /// Table produite, dans le schéma de la table superposée
    pub fn output_table(&self) -> Result<TableRef> {
        let name = Ident::new(format!(
            "{}_{}_{}",
            self.base.table,
            self.kind.table_infix(),
            self.overlay_name()
        ))?;
        Ok(self.overlay.sibling(name))
    }

    /// Colonne identifiant de la table produite (`capakey_sar`)
    pub fn id_column(&self) -> Result<Ident> {
        self.base_id.suffixed(self.overlay_name().as_str())
    }

    fn value_column(&self) -> Result<Ident> {
        match self.kind {
            OverlayKind::Coverage => self.overlay_name().suffixed("coverage"),
            OverlayKind::Count => self.overlay_name().suffixed("count"),
            OverlayKind::Sum => {
                let col = self
                    .sum_column
                    .as_ref()
                    .ok_or(SqlError::Empty("sum column for a sum overlay"))?;
                col.suffixed("tot")
            }
        }
    }

    /// Requête des classes distinctes, réutilisée telle quelle comme requête
    /// de catégories de `crosstab`
    pub fn distinct_classes_query(&self) -> Option<String> {
        self.class_column.as_ref().map(|class| {
            format!(
                "SELECT DISTINCT {class}::text FROM {overlay} WHERE {class} IS NOT NULL ORDER BY 1",
                class = class,
                overlay = self.overlay
            )
        })
    }

    /// Colonnes du pivot pour les classes données, dans le même ordre
    ///
    /// Deux valeurs menant au même nom de colonne sont refusées.
    pub fn pivot_columns(&self, classes: &[String]) -> Result<Vec<Ident>> {
        let class = self
            .class_column
            .as_ref()
            .ok_or(SqlError::Empty("class column"))?;
        if classes.is_empty() {
            return Err(SqlError::EmptyPivot(class.to_string()));
        }
        let infix = match self.kind {
            OverlayKind::Coverage => "prop",
            _ => "count",
        };
        let mut columns: Vec<(Ident, &str)> = Vec::with_capacity(classes.len());
        for value in classes {
            let col = self
                .overlay_name()
                .suffixed(&format!("{}_{}", infix, column_suffix(value)?))?;
            if let Some((_, first)) = columns.iter().find(|(c, _)| *c == col) {
                return Err(SqlError::DuplicateColumn {
                    first: first.to_string(),
                    second: value.clone(),
                    column: col.to_string(),
                });
            }
            columns.push((col, value.as_str()));
        }
        Ok(columns.into_iter().map(|(c, _)| c).collect())
    }

    /// Requêtes du calcul, à exécuter dans une même transaction
    ///
    /// `classes` est le résultat de [`Self::distinct_classes_query`]; il est
    /// ignoré sans colonne de classe.
    pub fn statements(&self, classes: &[String]) -> Result<Vec<String>> {
        self.validate()?;
        let output = self.output_table()?;
        match &self.class_column {
            None => Ok(vec![
                format!("DROP TABLE IF EXISTS {}", output),
                format!("CREATE TABLE {} AS ({})", output, self.select(None)?),
            ]),
            Some(class) => self.pivot_statements(&output, class, classes),
        }
    }

    fn pivot_statements(&self, output: &TableRef, class: &Ident, classes: &[String]) -> Result<Vec<String>> {
        let columns = self.pivot_columns(classes)?;
        let scratch = TableRef::new(
            Ident::new("pg_temp")?,
            Ident::new(format!("tmp_{}", output.table))?,
        );
        let id_col = self.id_column()?;
        let value_col = self.value_column()?;
        let categories = self.distinct_classes_query().unwrap_or_default();

        let source = format!(
            "SELECT {id}, {class}, {value} FROM {scratch} ORDER BY 1, 2",
            id = id_col,
            class = class,
            value = value_col,
            scratch = scratch
        );
        let mut declared = vec![format!("{} {}", id_col, self.id_type)];
        declared.extend(columns.iter().map(|c| format!("{} NUMERIC", c)));

        Ok(vec![
            format!("DROP TABLE IF EXISTS {}", scratch),
            format!(
                "CREATE TEMP TABLE {} ON COMMIT DROP AS ({})",
                scratch.table,
                self.select(Some(class))?
            ),
            format!("DROP TABLE IF EXISTS {}", output),
            format!(
                "CREATE TABLE {} AS (SELECT * FROM crosstab({}, {}) AS ct ({}))",
                output,
                quote_literal(&source),
                quote_literal(&categories),
                declared.join(", ")
            ),
        ])
    }

    fn select(&self, class: Option<&Ident>) -> Result<String> {
        let id_col = self.id_column()?;
        let name = self.overlay_name();
        let geom = &self.geom;
        let mut fields = vec![format!("base.{} AS {}", self.base_id, id_col)];
        let mut group_by = vec![format!("base.{}", self.base_id)];
        if let Some(class) = class {
            fields.push(format!("overlay.{c}::text AS {c}", c = class));
            group_by.push(format!("overlay.{}", class));
        }

        match self.kind {
            OverlayKind::Coverage => {
                let inter = format!("ST_Area(ST_Intersection(base.{g}, overlay.{g}))", g = geom);
                fields.push(format!(
                    "ROUND(CAST(SUM({}) AS numeric), 4) AS {}",
                    inter,
                    name.suffixed("area")?
                ));
                // Somme des ratios: peut dépasser 1 par imprécision numérique
                fields.push(format!(
                    "GREATEST(LEAST(ROUND(CAST(SUM({} / NULLIF(ST_Area(base.{}), 0)) AS numeric), 4), 1.0), 0) AS {}",
                    inter,
                    geom,
                    name.suffixed("coverage")?
                ));
                if let Some(extra) = &self.extra {
                    fields.push(format!(
                        "{}(overlay.{}) AS {}",
                        extra.aggregate.as_sql(),
                        extra.column,
                        name.suffixed(extra.column.as_str())?
                    ));
                }
            }
            OverlayKind::Count => {
                fields.push(format!("count(*) AS {}", name.suffixed("count")?));
            }
            OverlayKind::Sum => {
                let col = self
                    .sum_column
                    .as_ref()
                    .ok_or(SqlError::Empty("sum column for a sum overlay"))?;
                fields.push(format!("sum(overlay.{}) AS {}", col, col.suffixed("tot")?));
                fields.push(format!("count(*) AS count_{}_points", name));
            }
        }

        let mut sql = format!(
            "SELECT {} FROM {} AS base JOIN {} AS overlay ON ST_Intersects(base.{g}, overlay.{g})",
            fields.join(", "),
            self.base,
            self.overlay,
            g = geom
        );
        if let Some(class) = class {
            sql.push_str(&format!(" WHERE overlay.{} IS NOT NULL", class));
        }
        sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
        Ok(sql)
    }
}
