//! Export d'une table ou d'une requête vers un fichier (`ogr2ogr`)

use std::path::Path;

use tracing::info;

use landuse_sql::TableRef;

use crate::db::DatabaseConfig;
use crate::error::{PipelineError, Result};
use crate::tools::{gdal_pg_source, pg_env, ToolCommand};

/// Données exportées: une table ou le résultat d'une requête
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSource {
    Table(TableRef),
    Query(String),
}

impl ExportSource {
    /// Exactement une des deux sources
    pub fn from_options(table: Option<TableRef>, query: Option<String>) -> Result<Self> {
        match (table, query) {
            (Some(table), None) => Ok(Self::Table(table)),
            (None, Some(query)) => {
                let query = query.trim().trim_end_matches(';').trim().to_string();
                if query.is_empty() || query.contains(';') {
                    return Err(PipelineError::config("Export query must be a single SELECT statement"));
                }
                Ok(Self::Query(query))
            }
            _ => Err(PipelineError::config("Export needs exactly one of --table or --query")),
        }
    }
}

/// Commande `ogr2ogr <fichier> PG:... <table>` ou `-sql <requête>`
pub fn export_command(
    db: &DatabaseConfig,
    source: &ExportSource,
    file: &Path,
    format: Option<&str>,
) -> ToolCommand {
    let mut command = ToolCommand::new("ogr2ogr");
    if let Some(format) = format {
        command = command.args(["-f", format]);
    }
    command = command
        .arg(file.display().to_string())
        .arg(gdal_pg_source(db));
    command = match source {
        ExportSource::Table(table) => command.arg(table.to_string()),
        ExportSource::Query(query) => command.arg("-sql").arg(query.clone()),
    };
    command.envs(pg_env(db))
}

pub async fn export(
    db: &DatabaseConfig,
    source: &ExportSource,
    file: &Path,
    format: Option<&str>,
) -> Result<()> {
    export_command(db, source, file, format).run().await?;
    info!(file = %file.display(), "Export written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_exclusive() {
        let table: TableRef = "results.classif".parse().unwrap();
        assert!(ExportSource::from_options(Some(table.clone()), None).is_ok());
        assert!(ExportSource::from_options(Some(table), Some("SELECT 1".into())).is_err());
        assert!(ExportSource::from_options(None, None).is_err());
        assert!(ExportSource::from_options(None, Some("SELECT 1; DROP TABLE x".into())).is_err());
        assert_eq!(
            ExportSource::from_options(None, Some(" SELECT * FROM a; ".into())).unwrap(),
            ExportSource::Query("SELECT * FROM a".into())
        );
    }

    #[test]
    fn test_export_command() {
        let db = DatabaseConfig::default();
        let source = ExportSource::Query("SELECT * FROM results.classif WHERE walousmaj = '5_1'".into());
        let cmd = export_command(&db, &source, Path::new("out/res.shp"), None);
        assert_eq!(
            cmd.arguments(),
            &[
                "out/res.shp".to_string(),
                "PG:host=localhost port=5432 user=postgres dbname=walous".to_string(),
                "-sql".to_string(),
                "SELECT * FROM results.classif WHERE walousmaj = '5_1'".to_string(),
            ]
        );

        let table = ExportSource::Table("results.classif".parse().unwrap());
        let cmd = export_command(&db, &table, Path::new("res.gpkg"), Some("GPKG"));
        assert_eq!(cmd.arguments()[..2], ["-f".to_string(), "GPKG".to_string()]);
        assert_eq!(cmd.arguments().last().unwrap(), "results.classif");
    }
}
