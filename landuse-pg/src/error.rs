//! Erreurs du pipeline et codes de sortie associés

use std::path::PathBuf;

use landuse_sql::SqlError;
use thiserror::Error;

/// Erreurs remontées jusqu'au `main`
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration absente, illisible ou invalide
    #[error("Configuration error: {0}")]
    Config(String),

    /// Accès au système de fichiers
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Outil externe en échec (statut non nul ou sortie d'erreur non vide)
    #[error("{tool} failed ({status}): {stderr}")]
    Tool {
        tool: String,
        status: String,
        stderr: String,
    },

    /// Erreur renvoyée par PostgreSQL
    #[error("Database error while {context}: {source}")]
    Database {
        context: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// Pool de connexions indisponible
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Requête refusée à la construction
    #[error(transparent)]
    Sql(#[from] SqlError),
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Code de sortie du processus
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Sql(_) => 2,
            Self::Io { .. } => 3,
            Self::Tool { .. } => 4,
            Self::Database { .. } | Self::Pool(_) => 5,
        }
    }
}

impl From<deadpool_postgres::PoolError> for PipelineError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Self::Pool(e.to_string())
    }
}

impl From<deadpool_postgres::CreatePoolError> for PipelineError {
    fn from(e: deadpool_postgres::CreatePoolError) -> Self {
        Self::Pool(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Contexte d'une erreur PostgreSQL
pub trait DbContext<T> {
    fn db_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> DbContext<T> for std::result::Result<T, tokio_postgres::Error> {
    fn db_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| PipelineError::Database {
            context: context.into(),
            source,
        })
    }
}

/// Contexte d'une erreur d'entrée/sortie
pub trait IoContext<T> {
    fn io_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| PipelineError::io(path, source))
    }
}

/// Code de sortie d'une erreur quelconque (1 si elle ne vient pas du pipeline)
pub fn exit_code_of(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map(PipelineError::exit_code)
        .or_else(|| error.downcast_ref::<SqlError>().map(|_| 2))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(PipelineError::config("bad preset").exit_code(), 2);
        assert_eq!(
            PipelineError::io("/nope", std::io::Error::from(std::io::ErrorKind::NotFound)).exit_code(),
            3
        );
        let tool = PipelineError::Tool {
            tool: "psql".into(),
            status: "exit status: 1".into(),
            stderr: "ERROR: relation does not exist".into(),
        };
        assert_eq!(tool.exit_code(), 4);
        assert_eq!(PipelineError::Pool("timeout".into()).exit_code(), 5);
        assert_eq!(PipelineError::from(SqlError::Empty("join list")).exit_code(), 2);
    }

    #[test]
    fn test_exit_code_through_anyhow_context() {
        use anyhow::Context;
        let err: anyhow::Result<()> = Err(PipelineError::Pool("down".into())).context("while connecting");
        assert_eq!(exit_code_of(&err.unwrap_err()), 5);
        assert_eq!(exit_code_of(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_display() {
        let err = PipelineError::Tool {
            tool: "pg_dump".into(),
            status: "exit status: 1".into(),
            stderr: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "pg_dump failed (exit status: 1): connection refused");
    }
}
