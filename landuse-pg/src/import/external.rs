//! Chargement de fichiers géographiques par `shp2pgsql | psql` ou `ogr2ogr`

use std::path::Path;
use std::str::FromStr;

use tracing::info;

use landuse_sql::TableRef;

use crate::db::DatabaseConfig;
use crate::error::{PipelineError, Result};
use crate::tools::{gdal_pg_source, pg_connection_args, pg_env, pipe, ToolCommand};

/// Mode de création de `shp2pgsql`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShpMode {
    /// Supprime et recrée la table
    #[default]
    Drop,
    Append,
    Create,
    /// Crée la table sans la remplir
    Prepare,
}

impl ShpMode {
    pub fn flag(self) -> &'static str {
        match self {
            ShpMode::Drop => "-d",
            ShpMode::Append => "-a",
            ShpMode::Create => "-c",
            ShpMode::Prepare => "-p",
        }
    }
}

impl FromStr for ShpMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim_start_matches('-') {
            "d" | "drop" => Ok(ShpMode::Drop),
            "a" | "append" => Ok(ShpMode::Append),
            "c" | "create" => Ok(ShpMode::Create),
            "p" | "prepare" => Ok(ShpMode::Prepare),
            _ => Err(format!("Invalid shp2pgsql mode: {}. Use: drop, append, create, prepare", s)),
        }
    }
}

/// Mode de création de `ogr2ogr`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OgrMode {
    #[default]
    Overwrite,
    Append,
    Update,
}

impl OgrMode {
    pub fn flag(self) -> &'static str {
        match self {
            OgrMode::Overwrite => "-overwrite",
            OgrMode::Append => "-append",
            OgrMode::Update => "-update",
        }
    }
}

impl FromStr for OgrMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim_start_matches('-') {
            "overwrite" => Ok(OgrMode::Overwrite),
            "append" => Ok(OgrMode::Append),
            "update" => Ok(OgrMode::Update),
            _ => Err(format!("Invalid ogr2ogr mode: {}. Use: overwrite, append, update", s)),
        }
    }
}

/// Paramètres d'un import `shp2pgsql`
#[derive(Debug, Clone)]
pub struct ShapefileImport<'a> {
    pub path: &'a Path,
    pub table: &'a TableRef,
    pub from_srid: u32,
    pub to_srid: u32,
    pub mode: ShpMode,
    pub quiet: bool,
}

/// Paire de commandes `shp2pgsql ... | psql ...`
pub fn shp2pgsql_commands(db: &DatabaseConfig, import: &ShapefileImport<'_>) -> (ToolCommand, ToolCommand) {
    let producer = ToolCommand::new("shp2pgsql")
        .args(["-t", "2D", "-s"])
        .arg(format!("{}:{}", import.from_srid, import.to_srid))
        .arg(import.mode.flag())
        .arg("-I")
        .arg(import.path.display().to_string())
        .arg(import.table.to_string());

    let mut consumer = ToolCommand::new("psql");
    if import.quiet {
        consumer = consumer.arg("--quiet");
    }
    let consumer = consumer
        .args(pg_connection_args(db))
        .args(["-v", "ON_ERROR_STOP=1"])
        .envs(pg_env(db))
        // Les NOTICE (DROP ... IF EXISTS) ne doivent pas passer pour des erreurs
        .env("PGOPTIONS", "-c client_min_messages=warning");

    (producer, consumer)
}

/// Importe un shapefile
pub async fn import_shapefile(db: &DatabaseConfig, import: &ShapefileImport<'_>) -> Result<()> {
    ensure_file(import.path)?;
    let (producer, consumer) = shp2pgsql_commands(db, import);
    pipe(producer, consumer).await?;
    info!(
        file = %import.path.display(),
        table = %import.table,
        database = %db.dbname,
        "Shapefile imported"
    );
    Ok(())
}

/// Paramètres d'un import `ogr2ogr`
#[derive(Debug, Clone)]
pub struct OgrImport<'a> {
    pub path: &'a Path,
    /// Table cible; par défaut le nom du fichier dans le schéma de connexion
    pub table: Option<&'a TableRef>,
    pub to_srid: Option<u32>,
    pub mode: OgrMode,
}

/// Commande `ogr2ogr -f PostgreSQL PG:...`
pub fn ogr2ogr_import_command(db: &DatabaseConfig, import: &OgrImport<'_>) -> ToolCommand {
    let mut command = ToolCommand::new("ogr2ogr")
        .args(["-f", "PostgreSQL"])
        .arg(gdal_pg_source(db))
        .arg(import.mode.flag())
        .args(["-lco", "GEOMETRY_NAME=geom", "-nlt", "PROMOTE_TO_MULTI", "-dim", "XY"]);
    if let Some(srid) = import.to_srid {
        command = command.arg("-t_srs").arg(format!("EPSG:{}", srid));
    }
    if let Some(table) = import.table {
        command = command.arg("-nln").arg(table.to_string());
    }
    command
        .arg(import.path.display().to_string())
        .envs(pg_env(db))
}

/// Importe un fichier lisible par GDAL (shapefile, geopackage...)
pub async fn import_ogr(db: &DatabaseConfig, import: &OgrImport<'_>) -> Result<()> {
    ensure_file(import.path)?;
    ogr2ogr_import_command(db, import).run().await?;
    info!(file = %import.path.display(), database = %db.dbname, "File imported with ogr2ogr");
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "input file not found"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shp2pgsql_commands() {
        let db = DatabaseConfig::default();
        let table: TableRef = "agdp.capa".parse().unwrap();
        let path = Path::new("data/Bpn_CaPa.shp");
        let import = ShapefileImport {
            path,
            table: &table,
            from_srid: 31370,
            to_srid: 31370,
            mode: ShpMode::Drop,
            quiet: true,
        };
        let (producer, consumer) = shp2pgsql_commands(&db, &import);
        assert_eq!(
            producer.arguments().join(" "),
            "-t 2D -s 31370:31370 -d -I data/Bpn_CaPa.shp agdp.capa"
        );
        assert_eq!(
            consumer.arguments().join(" "),
            "--quiet -h localhost -p 5432 -U postgres -d walous -v ON_ERROR_STOP=1"
        );
    }

    #[test]
    fn test_ogr2ogr_import_command() {
        let db = DatabaseConfig::default();
        let table: TableRef = "agdp.uncadastred_spaces".parse().unwrap();
        let import = OgrImport {
            path: Path::new("spaces.gpkg"),
            table: Some(&table),
            to_srid: Some(31370),
            mode: OgrMode::Overwrite,
        };
        assert_eq!(
            ogr2ogr_import_command(&db, &import).arguments().join(" "),
            "-f PostgreSQL PG:host=localhost port=5432 user=postgres dbname=walous -overwrite \
             -lco GEOMETRY_NAME=geom -nlt PROMOTE_TO_MULTI -dim XY -t_srs EPSG:31370 \
             -nln agdp.uncadastred_spaces spaces.gpkg"
        );
    }

    #[test]
    fn test_modes() {
        assert_eq!("-a".parse::<ShpMode>().unwrap(), ShpMode::Append);
        assert_eq!("prepare".parse::<ShpMode>().unwrap().flag(), "-p");
        assert_eq!("-update".parse::<OgrMode>().unwrap(), OgrMode::Update);
        assert!("x".parse::<OgrMode>().is_err());
    }
}
