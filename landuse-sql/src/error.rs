//! Types d'erreurs pour le crate landuse-sql

use thiserror::Error;

/// Erreurs de validation lors de la construction des requêtes SQL
#[derive(Debug, Error)]
pub enum SqlError {
    /// Identifiant SQL invalide (schéma, table, colonne)
    #[error("Invalid SQL identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: String },

    /// Référence de table invalide (attendu: schema.table)
    #[error("Invalid table reference '{0}' (expected schema.table)")]
    InvalidTableRef(String),

    /// Code d'occupation du sol invalide
    #[error("Invalid land-use code '{0}'")]
    InvalidCode(String),

    /// Condition de règle refusée
    #[error("Invalid rule condition '{condition}': {reason}")]
    InvalidCondition { condition: String, reason: String },

    /// Déclaration de type de colonne refusée
    #[error("Invalid column type '{0}'")]
    InvalidType(String),

    /// Agrégat non supporté
    #[error("Unsupported aggregate '{0}' (use: sum, min, max, avg, count)")]
    UnsupportedAggregate(String),

    /// Options incompatibles avec le type de calcul de superposition
    #[error("Invalid overlay job on '{overlay}': {reason}")]
    InvalidOverlay { overlay: String, reason: &'static str },

    /// Deux valeurs de classe produisent la même colonne de pivot
    #[error("Class values '{first}' and '{second}' both map to column '{column}'")]
    DuplicateColumn {
        first: String,
        second: String,
        column: String,
    },

    /// Pivot demandé sans aucune classe distincte
    #[error("No distinct value found in class column '{0}'")]
    EmptyPivot(String),

    /// Requête vide ou liste de colonnes vide
    #[error("Empty {0}")]
    Empty(&'static str),

    /// Fichier texte illisible dans l'encodage annoncé
    #[error("Cannot decode input as {encoding}")]
    Decoding { encoding: &'static str },

    /// Encodage inconnu
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),
}

impl SqlError {
    /// Crée une erreur d'identifiant avec contexte
    pub fn identifier(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Crée une erreur de condition avec contexte
    pub fn condition(condition: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCondition {
            condition: condition.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SqlError>;
