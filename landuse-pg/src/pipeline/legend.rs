//! Conversion de légende HILUCS
//!
//! Les trois sorties (code unique, tableau, niveaux) sont écrites requête par
//! requête, sans transaction englobante.

use deadpool_postgres::Pool;
use serde::Serialize;
use tracing::info;

use landuse_sql::code::levels;
use landuse_sql::legend::level_statements;
use landuse_sql::{LegendMap, TableRef};

use crate::config::LegendConfig;
use crate::db::run_committed;
use crate::error::Result;
use crate::report::StageOutcome;

/// Écrit les colonnes de légende sur `table`
pub async fn apply_legend(pool: &Pool, table: &TableRef, legend: &LegendConfig) -> Result<StageOutcome> {
    let cols = legend.columns();
    info!(table = %table, single = %cols.single, multiple = %cols.multiple, "Converting legend");

    let mut outcome = run_committed(pool, "legend single", &legend.map.single_statements(table, &cols)).await?;
    outcome.stage = "legend".to_string();

    let array = legend.map.array_statements(table, &cols)?;
    outcome.absorb(run_committed(pool, "legend array", &array).await?);

    if legend.levels {
        let statements = level_statements(table, &cols.label)?;
        outcome.absorb(run_committed(pool, "legend levels", &statements).await?);
    }
    Ok(outcome)
}

/// Conversion calculée en mémoire, sans base de données
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendPreview {
    pub label: String,
    pub all_codes: Vec<String>,
    pub single: String,
    pub multiple: Vec<String>,
    pub levels: [Option<String>; 4],
}

impl LegendPreview {
    pub fn new(map: &LegendMap, label: &str, all_codes: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            all_codes: all_codes.iter().map(|c| c.to_string()).collect(),
            single: map.map_code(label),
            multiple: map.map_codes(label, all_codes),
            levels: levels(label).map(|l| l.map(str::to_string)),
        }
    }

    pub fn display(&self) {
        println!("Label:    {}", self.label);
        println!("Codes:    [{}]", self.all_codes.join(", "));
        println!("Single:   {}", self.single);
        println!("Multiple: [{}]", self.multiple.join(", "));
        for (i, level) in self.levels.iter().enumerate() {
            println!("Level {}:  {}", i + 1, level.as_deref().unwrap_or("NULL"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_preview_with_preset_legend() {
        let config = Config::from_preset("walous").unwrap();
        let legend = config.pipeline.legend.unwrap();

        let preview = LegendPreview::new(&legend.map, "5_1_C", &["1_1", "1_1_1", "6_6_A"]);
        assert_eq!(preview.single, "5_1");
        assert_eq!(preview.multiple, vec!["5_1", "1_1_1"]);
        assert_eq!(
            preview.levels,
            [Some("5".to_string()), Some("5_1".to_string()), Some("5_1_C".to_string()), None]
        );
    }

    #[test]
    fn test_preview_removes_ancestor_only_with_descendant() {
        let map: LegendMap = serde_json::from_str(r#"{"remove": ["1_1"]}"#).unwrap();
        assert_eq!(LegendPreview::new(&map, "1_1", &["1_1_1"]).multiple, vec!["1_1_1"]);
        assert_eq!(LegendPreview::new(&map, "1_1", &["2_1"]).multiple, vec!["1_1", "2_1"]);
    }
}
