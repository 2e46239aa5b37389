//! Préparation des géométries avant superposition

use deadpool_postgres::Pool;
use tracing::info;

use landuse_sql::geom::{explode_statements, make_valid_statement, GeometryKind};
use landuse_sql::{Ident, TableRef};

use crate::db::{execute_committed, run_in_transaction};
use crate::error::Result;
use crate::report::StageOutcome;

/// Répare les géométries invalides et renvoie le nombre de lignes réparées
pub async fn make_valid(pool: &Pool, table: &TableRef, geom: &Ident, kind: GeometryKind) -> Result<u64> {
    let client = pool.get().await?;
    let rows = execute_committed(&client, "make valid", &make_valid_statement(table, geom, kind)).await?;
    info!(table = %table, repaired = rows, "Invalid geometries repaired");
    Ok(rows)
}

/// Remplace la table par ses parties simples et recrée l'index spatial
pub async fn explode_multipart(pool: &Pool, table: &TableRef, id: &Ident, geom: &Ident) -> Result<StageOutcome> {
    let statements = explode_statements(table, id, geom)?;
    let outcome = run_in_transaction(pool, "explode multipart", &statements).await?;
    info!(table = %table, rows = outcome.rows_affected, "Multipart geometries exploded");
    Ok(outcome)
}
