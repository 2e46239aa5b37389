//! Chargement des jeux de données

pub mod csv;
pub mod external;

use std::path::Path;

use deadpool_postgres::Pool;

use landuse_sql::copy::{encoding_for_label, CsvOptions};

use crate::config::{Config, Dataset};
use crate::db::DatabaseConfig;
use crate::error::{PipelineError, Result};

pub use self::csv::{import_csv, CsvImport};
pub use external::{import_ogr, import_shapefile, OgrImport, OgrMode, ShapefileImport, ShpMode};

/// Format déduit de l'extension du fichier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Shapefile,
    /// Tout autre format lu par GDAL (gpkg, geojson...)
    Ogr,
}

impl SourceFormat {
    pub fn detect(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") | Some("txt") => SourceFormat::Csv,
            Some("shp") => SourceFormat::Shapefile,
            _ => SourceFormat::Ogr,
        }
    }
}

/// Options communes de `import dataset`
#[derive(Debug, Clone, Default)]
pub struct DatasetOptions {
    pub overwrite: bool,
    /// SRID source des shapefiles (défaut: celui de la configuration)
    pub from_srid: Option<u32>,
    pub delimiter: Option<char>,
}

/// Importe un jeu de données décrit dans la configuration
pub async fn import_dataset(
    pool: &Pool,
    db: &DatabaseConfig,
    config: &Config,
    name: &str,
    options: &DatasetOptions,
) -> Result<()> {
    let dataset = config.dataset(name)?;
    match SourceFormat::detect(&dataset.path) {
        SourceFormat::Csv => {
            let columns = dataset.columns.as_deref().ok_or_else(|| {
                PipelineError::config(format!("Dataset '{}' is a CSV file but declares no columns", name))
            })?;
            let import = CsvImport {
                path: &dataset.path,
                table: &dataset.table,
                columns,
                options: csv_options(dataset, options)?,
                overwrite: options.overwrite,
            };
            import_csv(pool, &import).await?;
        }
        SourceFormat::Shapefile => {
            let import = ShapefileImport {
                path: &dataset.path,
                table: &dataset.table,
                from_srid: options.from_srid.unwrap_or(config.srid),
                to_srid: config.srid,
                mode: if options.overwrite { ShpMode::Drop } else { ShpMode::Create },
                quiet: true,
            };
            import_shapefile(db, &import).await?;
        }
        SourceFormat::Ogr => {
            let import = OgrImport {
                path: &dataset.path,
                table: Some(&dataset.table),
                to_srid: Some(config.srid),
                mode: if options.overwrite { OgrMode::Overwrite } else { OgrMode::Append },
            };
            import_ogr(db, &import).await?;
        }
    }
    Ok(())
}

fn csv_options(dataset: &Dataset, options: &DatasetOptions) -> Result<CsvOptions> {
    let mut csv = CsvOptions {
        serial: dataset.serial,
        ..Default::default()
    };
    if let Some(delimiter) = options.delimiter {
        csv.delimiter = delimiter;
    }
    if let Some(ref label) = dataset.encoding {
        csv.fallback = encoding_for_label(label)?;
    }
    Ok(csv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(SourceFormat::detect(Path::new("a/DDDI000031.CSV")), SourceFormat::Csv);
        assert_eq!(SourceFormat::detect(Path::new("Bpn_CaPa.shp")), SourceFormat::Shapefile);
        assert_eq!(SourceFormat::detect(Path::new("spaces.gpkg")), SourceFormat::Ogr);
        assert_eq!(SourceFormat::detect(Path::new("noext")), SourceFormat::Ogr);
    }

    #[test]
    fn test_csv_options_from_dataset() {
        let config = Config::from_preset("walous").unwrap();
        let dataset = config.dataset("dbris2").unwrap();
        let options = csv_options(
            dataset,
            &DatasetOptions {
                delimiter: Some(','),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(options.serial);
        assert_eq!(options.delimiter, ',');
        assert_eq!(options.fallback.name(), "windows-1252");
    }
}
