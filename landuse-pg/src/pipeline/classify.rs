//! Table finale et classification par liste de décision

use deadpool_postgres::Pool;
use tracing::info;

use landuse_sql::classify::classification_statements;
use landuse_sql::join::FinalTable;
use landuse_sql::{ClassificationTarget, DecisionList};

use crate::db::run_in_transaction;
use crate::error::Result;
use crate::report::StageOutcome;

/// Crée la table finale en joignant les statistiques aux unités de base
pub async fn create_final_table(pool: &Pool, spec: &FinalTable) -> Result<StageOutcome> {
    let statements = spec.statements()?;
    info!(output = %spec.output, joins = spec.joins.len(), "Creating final table");
    run_in_transaction(pool, "final join", &statements).await
}

/// Crée la table résultat et y écrit l'étiquette et l'index de règle
///
/// Une condition mal formée n'est détectée que par la base: l'erreur annule
/// toute l'étape.
pub async fn classify(pool: &Pool, target: &ClassificationTarget, list: &DecisionList) -> Result<StageOutcome> {
    info!(
        result = %target.result,
        stats = %target.stats,
        rules = list.rules().len(),
        fallback = %list.fallback(),
        "Classifying"
    );
    let statements = classification_statements(target, list);
    run_in_transaction(pool, "classification", &statements).await
}
