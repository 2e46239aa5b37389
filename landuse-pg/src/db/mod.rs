//! Accès à PostgreSQL: pool, transactions d'étape, administration

pub mod admin;
pub mod pool;
pub mod transaction;

use std::time::Instant;

use deadpool_postgres::{Client, Pool};
use tracing::{debug, info};

use landuse_sql::format_elapsed;

use crate::error::{DbContext, Result};
use crate::report::{StageOutcome, StageStatus};

pub use pool::{create_pool, test_connection, DatabaseConfig, DatabaseOverrides, SslMode};
pub use transaction::{run_in_transaction, StageTransaction};

/// Exécute une requête hors transaction (commit immédiat)
pub async fn execute_committed(client: &Client, label: &str, sql: &str) -> Result<u64> {
    debug!(sql = %sql, "Executing statement");
    let rows = client
        .execute(sql, &[])
        .await
        .db_context(format!("executing {}", label))?;
    info!(statement = %label, rows = rows, "Statement committed");
    Ok(rows)
}

/// Exécute chaque requête avec son propre commit
///
/// Une erreur interrompt la suite; les requêtes déjà exécutées restent validées.
pub async fn run_committed(pool: &Pool, stage: &str, statements: &[String]) -> Result<StageOutcome> {
    let client = pool.get().await?;
    let started = Instant::now();
    let mut rows_affected = 0;
    for (i, sql) in statements.iter().enumerate() {
        rows_affected += execute_committed(&client, &format!("{} #{}", stage, i + 1), sql).await?;
    }
    info!(
        stage = %stage,
        statements = statements.len(),
        rows = rows_affected,
        elapsed = %format_elapsed(started.elapsed()),
        "Stage done"
    );
    Ok(StageOutcome {
        stage: stage.to_string(),
        statements: statements.len(),
        rows_affected,
        duration_secs: started.elapsed().as_secs_f64(),
        status: StageStatus::Committed,
    })
}

/// Vrai si la requête renvoie au moins une ligne
pub async fn exists(client: &Client, sql: &str) -> Result<bool> {
    debug!(sql = %sql, "Checking existence");
    let row = client
        .query_opt(sql, &[])
        .await
        .db_context("checking existence")?;
    Ok(row.is_some())
}

/// Première colonne (texte) de chaque ligne
pub async fn query_texts(client: &Client, sql: &str) -> Result<Vec<String>> {
    debug!(sql = %sql, "Querying");
    let rows = client.query(sql, &[]).await.db_context("querying")?;
    rows.iter()
        .map(|row| row.try_get::<_, String>(0))
        .collect::<std::result::Result<Vec<_>, _>>()
        .db_context("reading text values")
}
