//! # landuse-sql
//!
//! Construction des requêtes SQL d'une chaîne de classification de
//! l'occupation du sol sur PostGIS. Aucune connexion: chaque fonction rend
//! une ou plusieurs requêtes à exécuter dans l'ordre.
//!
//! ## Features
//!
//! - Identifiants SQL validés (`Ident`, `TableRef`), littéraux quotés
//! - Statistiques de superposition (couverture, comptage, somme, pivot par classe)
//! - Classification par liste de décision et corrections ordonnées
//! - Conversion de légende HILUCS, avec un miroir en mémoire des requêtes
//! - Préparation des CSV pour `COPY` (détection `simdutf8`, repli `encoding_rs`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use landuse_sql::{DecisionList, Rule, LandUseCode};
//!
//! let rules: Vec<Rule> = serde_json::from_str(r#"[["area > 2500", "'2_1'"]]"#)?;
//! let list = DecisionList::new(rules, LandUseCode::new("6_6_A")?);
//! println!("{}", list.label_expr());
//! ```

pub mod classify;
pub mod code;
pub mod copy;
pub mod ddl;
pub mod error;
pub mod geom;
pub mod ident;
pub mod join;
pub mod legend;
pub mod overlay;
pub mod postclass;
pub mod publish;
pub mod stats;
pub mod timing;

pub use classify::{ClassificationTarget, DecisionList, Rule};
pub use code::LandUseCode;
pub use error::{Result, SqlError};
pub use ident::{Condition, Ident, SqlType, TableRef};
pub use legend::{LegendColumns, LegendMap};
pub use overlay::{OverlayJob, OverlayKind};
pub use postclass::{Postclassification, PostclassTarget};
pub use timing::format_elapsed;
