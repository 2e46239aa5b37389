//! Tables livrables

use deadpool_postgres::Pool;
use tracing::info;

use landuse_sql::publish::{PublishSpec, UncadastredMerge};

use crate::db::run_in_transaction;
use crate::error::Result;
use crate::report::StageOutcome;

/// Crée la table livrée avec les colonnes retenues
pub async fn publish(pool: &Pool, spec: &PublishSpec) -> Result<StageOutcome> {
    let statements = spec.statements()?;
    info!(source = %spec.source, output = %spec.output, columns = spec.columns.len(), "Publishing");
    run_in_transaction(pool, "publish", &statements).await
}

/// Ajoute les espaces non cadastrés à une copie de la table livrée
pub async fn merge_uncadastred(pool: &Pool, merge: &UncadastredMerge) -> Result<StageOutcome> {
    let statements = merge.statements()?;
    info!(
        published = %merge.published,
        uncadastred = %merge.uncadastred,
        output = %merge.output,
        "Merging uncadastred spaces"
    );
    run_in_transaction(pool, "merge uncadastred", &statements).await
}
