//! # landuse-pg
//!
//! Chaîne de classification de l'occupation du sol (WALOUS) sur PostGIS.
//!
//! ## Features
//!
//! - Import des jeux de données (CSV via `COPY`, shapefiles via `shp2pgsql`, GDAL via `ogr2ogr`)
//! - Statistiques de superposition, table finale et classification par règles
//! - Postclassification ordonnée et conversion vers la légende HILUCS
//! - Session GRASS GIS (location, mapset, extensions)
//! - Sauvegarde `pg_dump` avec somme de contrôle BLAKE3, restauration, export
//!
//! ## Usage CLI
//!
//! ```bash
//! # Exécution complète avec le preset embarqué
//! landuse-pg run --config walous --report-json report.json
//!
//! # Étapes isolées
//! landuse-pg import dataset cama --overwrite
//! landuse-pg classify
//! landuse-pg legend preview 5_1_C 1_1 1_1_1
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod pipeline;
pub mod report;
pub mod session;
pub mod tools;

pub use config::Config;
pub use db::{create_pool, DatabaseConfig};
pub use error::{PipelineError, Result};
pub use report::{RunReport, RunStatus, StageOutcome, StageStatus};
