//! Transaction d'étape
//!
//! Une étape multi-requêtes (superposition, jointure, import CSV...) s'exécute
//! dans une seule transaction: la première erreur annule tout.

use std::time::Instant;

use deadpool_postgres::{Object, Transaction};
use tracing::{debug, error, info};

use landuse_sql::format_elapsed;

use crate::error::{DbContext, PipelineError, Result};
use crate::report::{StageOutcome, StageStatus};

/// Gestionnaire de transaction pour une étape du pipeline
pub struct StageTransaction<'a> {
    transaction: Transaction<'a>,
    stage: String,
    statements: usize,
    rows_affected: u64,
    started: Instant,
}

impl<'a> StageTransaction<'a> {
    /// Démarre la transaction d'une étape
    ///
    /// # Errors
    /// Retourne une erreur si la transaction ne peut pas être démarrée
    pub async fn begin(client: &'a mut Object, stage: &str) -> Result<Self> {
        let transaction = client
            .transaction()
            .await
            .db_context(format!("beginning transaction for {}", stage))?;

        info!(stage = %stage, "Starting stage transaction");

        Ok(Self {
            transaction,
            stage: stage.to_string(),
            statements: 0,
            rows_affected: 0,
            started: Instant::now(),
        })
    }

    /// Transaction sous-jacente (COPY, requêtes paramétrées)
    pub fn transaction(&self) -> &Transaction<'a> {
        &self.transaction
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Exécute une requête et cumule les lignes affectées
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!(stage = %self.stage, sql = %sql, "Executing statement");
        let rows = self
            .transaction
            .execute(sql, &[])
            .await
            .db_context(format!("executing {} statement #{}", self.stage, self.statements + 1))?;
        self.statements += 1;
        self.rows_affected += rows;
        Ok(rows)
    }

    /// Première colonne (texte) de chaque ligne
    pub async fn query_texts(&self, sql: &str) -> Result<Vec<String>> {
        debug!(stage = %self.stage, sql = %sql, "Querying");
        let rows = self
            .transaction
            .query(sql, &[])
            .await
            .db_context(format!("querying for {}", self.stage))?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context(format!("reading text values for {}", self.stage))
    }

    /// Enregistre des lignes traitées hors `execute` (COPY)
    pub fn record_rows(&mut self, rows: u64) {
        self.rows_affected += rows;
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Valide et commit la transaction
    ///
    /// # Errors
    /// Retourne une erreur si le commit échoue
    pub async fn commit(self) -> Result<StageOutcome> {
        self.transaction
            .commit()
            .await
            .db_context(format!("committing {}", self.stage))?;

        let elapsed = self.started.elapsed();
        info!(
            stage = %self.stage,
            statements = self.statements,
            rows = self.rows_affected,
            elapsed = %format_elapsed(elapsed),
            "Stage committed"
        );

        Ok(StageOutcome {
            stage: self.stage,
            statements: self.statements,
            rows_affected: self.rows_affected,
            duration_secs: elapsed.as_secs_f64(),
            status: StageStatus::Committed,
        })
    }

    /// Annule la transaction (rollback)
    ///
    /// La transaction est également annulée si elle est droppée.
    pub async fn rollback(self, reason: &str) -> StageOutcome {
        error!(
            stage = %self.stage,
            reason = %reason,
            statements_attempted = self.statements,
            "Rolling back stage"
        );

        if let Err(e) = self.transaction.rollback().await {
            error!(error = %e, "Explicit rollback failed (will rollback on drop anyway)");
        }

        StageOutcome {
            stage: self.stage,
            statements: self.statements,
            rows_affected: 0,
            duration_secs: self.started.elapsed().as_secs_f64(),
            status: StageStatus::RolledBack,
        }
    }

    /// Exécute toutes les requêtes puis commit, ou rollback à la première erreur
    pub async fn run_all(mut self, statements: &[String]) -> Result<StageOutcome> {
        for sql in statements {
            if let Err(e) = self.execute(sql).await {
                self.rollback(&e.to_string()).await;
                return Err(e);
            }
        }
        self.commit().await
    }

    /// Annule la transaction et propage l'erreur
    pub async fn abort<T>(self, error: PipelineError) -> Result<T> {
        self.rollback(&error.to_string()).await;
        Err(error)
    }
}

/// Exécute une étape dans sa propre connexion et sa propre transaction
pub async fn run_in_transaction(
    pool: &deadpool_postgres::Pool,
    stage: &str,
    statements: &[String],
) -> Result<StageOutcome> {
    let mut client = pool.get().await?;
    let tx = StageTransaction::begin(&mut client, stage).await?;
    tx.run_all(statements).await
}
