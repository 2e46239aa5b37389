//! Statistiques de superposition
//!
//! Le calcul d'une superposition (requête des classes distinctes comprise)
//! s'exécute dans une seule transaction.

use deadpool_postgres::Pool;
use tracing::info;

use landuse_sql::OverlayJob;

use crate::db::StageTransaction;
use crate::error::Result;
use crate::report::StageOutcome;

/// Nom d'étape d'une superposition (`overlay agdp.capa x ancillary.sar`)
pub fn stage_name(job: &OverlayJob) -> String {
    format!("overlay {} x {}", job.base, job.overlay)
}

/// Calcule une superposition et crée sa table de résultat
pub async fn run_overlay(pool: &Pool, job: &OverlayJob) -> Result<StageOutcome> {
    job.validate()?;
    let output = job.output_table()?;
    let stage = stage_name(job);

    let mut client = pool.get().await?;
    let tx = StageTransaction::begin(&mut client, &stage).await?;

    let classes = match job.distinct_classes_query() {
        Some(sql) => match tx.query_texts(&sql).await {
            Ok(classes) => {
                info!(overlay = %job.overlay, classes = classes.len(), "Distinct classes found");
                classes
            }
            Err(e) => return tx.abort(e).await,
        },
        None => Vec::new(),
    };

    let statements = match job.statements(&classes) {
        Ok(statements) => statements,
        Err(e) => return tx.abort(e.into()).await,
    };

    let outcome = tx.run_all(&statements).await?;
    info!(output = %output, kind = ?job.kind, "Overlay table created");
    Ok(outcome)
}

/// Calcule les superpositions dans l'ordre, en s'arrêtant à la première erreur
pub async fn run_overlays(pool: &Pool, jobs: &[OverlayJob]) -> Result<Vec<StageOutcome>> {
    let mut outcomes = Vec::with_capacity(jobs.len());
    for (i, job) in jobs.iter().enumerate() {
        info!(current = i + 1, total = jobs.len(), overlay = %job.overlay, "Computing overlay");
        outcomes.push(run_overlay(pool, job).await?);
    }
    Ok(outcomes)
}
