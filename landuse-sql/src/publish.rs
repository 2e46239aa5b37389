//! Tables livrables: sélection de colonnes et fusion des espaces non cadastrés

use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlError};
use crate::ident::{Ident, TableRef};

/// Table livrée aux utilisateurs finaux
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSpec {
    pub source: TableRef,
    pub output: TableRef,
    pub columns: Vec<Ident>,
}

impl PublishSpec {
    pub fn statements(&self) -> Result<Vec<String>> {
        if self.columns.is_empty() {
            return Err(SqlError::Empty("published column list"));
        }
        Ok(vec![
            format!("DROP TABLE IF EXISTS {}", self.output),
            format!(
                "CREATE TABLE {} AS (SELECT {} FROM {})",
                self.output,
                join(&self.columns),
                self.source
            ),
        ])
    }
}

/// Fusion de la table publiée avec les espaces non cadastrés
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncadastredMerge {
    pub published: TableRef,
    pub uncadastred: TableRef,
    pub output: TableRef,
    /// Colonnes communes copiées depuis les espaces non cadastrés
    pub columns: Vec<Ident>,
    #[serde(default = "UncadastredMerge::default_geom")]
    pub geom: Ident,
    #[serde(default = "UncadastredMerge::default_id")]
    pub id_column: Ident,
}

impl UncadastredMerge {
    fn default_geom() -> Ident {
        Ident::from_static("geom")
    }

    fn default_id() -> Ident {
        Ident::from_static("uncadastr_id")
    }

    pub fn statements(&self) -> Result<Vec<String>> {
        if self.columns.is_empty() {
            return Err(SqlError::Empty("merged column list"));
        }
        let cols = join(&self.columns);
        Ok(vec![
            format!("DROP TABLE IF EXISTS {}", self.output),
            format!("CREATE TABLE {} AS (SELECT * FROM {})", self.output, self.published),
            format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} integer",
                self.output, self.id_column
            ),
            format!(
                "INSERT INTO {out} ({g}, {cols}, {id}) \
                 SELECT ST_Multi(ST_CollectionExtract({g}, 3)) AS {g}, {cols}, {id} FROM {src}",
                out = self.output,
                g = self.geom,
                cols = cols,
                id = self.id_column,
                src = self.uncadastred
            ),
        ])
    }
}

fn join(columns: &[Ident]) -> String {
    columns.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
}
