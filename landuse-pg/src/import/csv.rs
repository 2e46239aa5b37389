//! Import CSV par `COPY ... FROM STDIN`
//!
//! Création de la table et COPY partagent une transaction: un fichier mal
//! formé ne laisse pas de table vide derrière lui.

use std::path::Path;

use deadpool_postgres::Pool;
use futures::SinkExt;
use tracing::{debug, info};

use landuse_sql::copy::{
    copy_statement, create_table_statements, decode, prepare_payload, ColumnDef, CsvOptions,
};
use landuse_sql::ddl::table_exists_query;
use landuse_sql::TableRef;

use crate::db::{exists, StageTransaction};
use crate::error::{DbContext, IoContext, PipelineError, Result};
use crate::report::StageOutcome;

/// Taille des blocs envoyés au flux COPY
const COPY_CHUNK_SIZE: usize = 1 << 20;

/// Paramètres d'un import CSV
#[derive(Debug, Clone)]
pub struct CsvImport<'a> {
    pub path: &'a Path,
    pub table: &'a TableRef,
    pub columns: &'a [ColumnDef],
    pub options: CsvOptions,
    /// Remplace la table si elle existe
    pub overwrite: bool,
}

/// Importe un fichier CSV dans une nouvelle table
pub async fn import_csv(pool: &Pool, import: &CsvImport<'_>) -> Result<StageOutcome> {
    let raw = tokio::fs::read(import.path).await.io_context(import.path)?;
    let (text, encoding) = decode(&raw, import.options.fallback)?;
    let payload = prepare_payload(&text, &import.options);
    info!(
        file = %import.path.display(),
        encoding = encoding.name(),
        rows = payload.rows,
        "CSV file read"
    );

    let statements = create_table_statements(import.table, import.columns, import.options.serial)?;
    let copy_sql = copy_statement(import.table, import.columns, &import.options);

    let mut client = pool.get().await?;
    if !import.overwrite && exists(&client, &table_exists_query(import.table)).await? {
        return Err(PipelineError::config(format!(
            "Table {} already exists (use --overwrite to replace it)",
            import.table
        )));
    }

    let mut tx = StageTransaction::begin(&mut client, "import-csv").await?;
    for sql in &statements {
        if let Err(e) = tx.execute(sql).await {
            return tx.abort(e).await;
        }
    }

    match copy_payload(&tx, &copy_sql, payload.data.into_bytes()).await {
        Ok(rows) => tx.record_rows(rows),
        Err(e) => return tx.abort(e).await,
    }
    tx.commit().await
}

async fn copy_payload(tx: &StageTransaction<'_>, copy_sql: &str, data: Vec<u8>) -> Result<u64> {
    debug!(sql = %copy_sql, "Starting COPY");
    let copy_in = tx
        .transaction()
        .copy_in(copy_sql)
        .await
        .db_context("starting COPY")?;
    let mut pinned = std::pin::pin!(copy_in);

    let data = bytes::Bytes::from(data);
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + COPY_CHUNK_SIZE).min(data.len());
        pinned
            .as_mut()
            .send(data.slice(offset..end))
            .await
            .db_context("sending COPY chunk")?;
        offset = end;
    }

    pinned.as_mut().finish().await.db_context("finishing COPY")
}
