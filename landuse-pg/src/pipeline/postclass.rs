//! Corrections de postclassification
//!
//! Chaque correction est validée séparément: une erreur au milieu de la suite
//! laisse les corrections précédentes en place. L'ordre compte, une correction
//! peut dépendre des étiquettes posées par la précédente.

use std::time::Instant;

use deadpool_postgres::Pool;
use tracing::info;

use landuse_sql::{format_elapsed, Postclassification, PostclassTarget};

use crate::db::execute_committed;
use crate::error::Result;
use crate::report::{StageOutcome, StageStatus};

/// Ajoute la colonne de règle puis applique les corrections dans l'ordre
pub async fn postclassify(
    pool: &Pool,
    target: &PostclassTarget,
    pipeline: &Postclassification,
) -> Result<StageOutcome> {
    let client = pool.get().await?;
    let started = Instant::now();
    let plan = pipeline.plan(target);

    info!(table = %target.table, corrections = plan.len(), "Starting postclassification");
    execute_committed(&client, "postclassification rule column", &target.add_rule_column_statement()).await?;

    let mut outcome = StageOutcome {
        stage: "postclassification".to_string(),
        statements: 1,
        rows_affected: 0,
        duration_secs: 0.0,
        status: StageStatus::Committed,
    };

    for correction in &plan {
        let step = Instant::now();
        info!(rule = correction.rule, name = correction.name, "{}", correction.description);
        let rows = execute_committed(
            &client,
            &format!("postclassification rule {} ({})", correction.rule, correction.name),
            &correction.sql,
        )
        .await?;
        info!(
            rule = correction.rule,
            name = correction.name,
            rows = rows,
            elapsed = %format_elapsed(step.elapsed()),
            "Correction applied"
        );
        outcome.absorb(StageOutcome {
            stage: correction.name.to_string(),
            statements: 1,
            rows_affected: rows,
            duration_secs: 0.0,
            status: StageStatus::Committed,
        });
    }

    outcome.duration_secs = started.elapsed().as_secs_f64();
    Ok(outcome)
}
