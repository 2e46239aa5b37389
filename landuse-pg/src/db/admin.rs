//! Administration de la base: extensions, schémas, droits, index

use deadpool_postgres::Pool;
use tracing::{info, warn};

use landuse_sql::ddl::{
    add_serial_statement, create_index_statements, create_schema_statements, grant_statements,
    schema_exists_query, table_exists_query, REQUIRED_EXTENSIONS,
};
use landuse_sql::{Ident, TableRef};

use crate::db::{execute_committed, exists, run_in_transaction};
use crate::error::{DbContext, PipelineError, Result};
use crate::report::StageOutcome;

/// Active les extensions nécessaires (postgis, tablefunc)
///
/// `CREATE EXTENSION` peut exiger des droits superuser: si l'extension est
/// déjà installée, l'échec est seulement signalé.
pub async fn ensure_extensions(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    for extension in REQUIRED_EXTENSIONS {
        let sql = format!("CREATE EXTENSION IF NOT EXISTS {}", extension);
        if let Err(e) = client.execute(&sql, &[]).await {
            warn!("CREATE EXTENSION {extension} failed (will check if already installed): {e}");
            let installed = client
                .query_opt("SELECT 1 FROM pg_extension WHERE extname = $1", &[&extension])
                .await
                .db_context("checking pg_extension")?
                .is_some();
            if !installed {
                return Err(PipelineError::Database {
                    context: format!("installing extension {}", extension),
                    source: e,
                });
            }
        }
    }
    Ok(())
}

/// Crée un schéma; s'il existe, `overwrite` le supprime d'abord (CASCADE)
pub async fn create_schema(pool: &Pool, schema: &Ident, overwrite: bool) -> Result<String> {
    let client = pool.get().await?;
    let present = exists(&client, &schema_exists_query(schema)).await?;
    if present && !overwrite {
        return Err(PipelineError::config(format!(
            "Schema '{}' already exists (use --overwrite to replace it)",
            schema
        )));
    }
    drop(client);

    run_in_transaction(pool, "create-schema", &create_schema_statements(schema, present)).await?;
    let message = if present {
        format!("Schema '{}' replaced", schema)
    } else {
        format!("Schema '{}' created", schema)
    };
    info!("{}", message);
    Ok(message)
}

/// Donne tous les droits d'un schéma à un utilisateur
pub async fn grant_user(pool: &Pool, schema: &Ident, user: &Ident) -> Result<StageOutcome> {
    run_in_transaction(pool, "grant", &grant_statements(schema, user)).await
}

/// (Re)crée l'index `<table>_<colonne>_idx`
pub async fn create_index(pool: &Pool, table: &TableRef, column: &Ident, gist: bool) -> Result<StageOutcome> {
    run_in_transaction(pool, "create-index", &create_index_statements(table, column, gist)?).await
}

/// Ajoute une colonne série (clé primaire ou non)
pub async fn add_serial(pool: &Pool, table: &TableRef, column: &Ident, primary_key: bool) -> Result<u64> {
    let client = pool.get().await?;
    execute_committed(&client, "add serial column", &add_serial_statement(table, column, primary_key)).await
}

/// Vrai si la table existe
pub async fn table_exists(pool: &Pool, table: &TableRef) -> Result<bool> {
    let client = pool.get().await?;
    exists(&client, &table_exists_query(table)).await
}
