//! Étapes du pipeline et exécution complète (`run`)
//!
//! Ordre: superpositions, table finale, classification, postclassification,
//! légende, publication puis fusion des espaces non cadastrés. Une section
//! absente de la configuration est notée `Skipped` dans le rapport.

pub mod classify;
pub mod geometry;
pub mod legend;
pub mod overlay;
pub mod postclass;
pub mod publish;
pub mod stats;

use std::time::Instant;

use deadpool_postgres::Pool;
use tracing::{error, info};

use landuse_sql::format_elapsed;

use crate::config::Config;
use crate::error::Result;
use crate::report::{RunReport, StageOutcome};

pub use classify::{classify, create_final_table};
pub use legend::{apply_legend, LegendPreview};
pub use overlay::{run_overlay, run_overlays};
pub use postclass::postclassify;
pub use publish::{merge_uncadastred, publish};

/// Exécute toutes les étapes configurées et complète le rapport
///
/// L'erreur de la première étape en échec est notée dans le rapport puis
/// propagée.
pub async fn run(pool: &Pool, config: &Config, report: &mut RunReport) -> Result<()> {
    let started = Instant::now();
    let result = run_stages(pool, config, report).await;
    report.set_duration(started.elapsed());

    match result {
        Ok(()) => {
            info!(elapsed = %format_elapsed(started.elapsed()), "Pipeline completed");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Pipeline failed");
            report.record_failure(&e);
            Err(e)
        }
    }
}

async fn run_stages(pool: &Pool, config: &Config, report: &mut RunReport) -> Result<()> {
    let pipeline = &config.pipeline;

    if pipeline.overlays.is_empty() {
        report.record(StageOutcome::skipped("overlays"));
    }
    for job in &pipeline.overlays {
        report.record(run_overlay(pool, job).await?);
    }

    match pipeline.final_table {
        Some(ref spec) => report.record(create_final_table(pool, spec).await?),
        None => report.record(StageOutcome::skipped("final join")),
    }

    match pipeline.classification {
        Some(ref classification) => {
            let outcome = classify(pool, &classification.target(), &classification.decision_list()).await?;
            report.record(outcome);
        }
        None => report.record(StageOutcome::skipped("classification")),
    }

    match pipeline.postclassification {
        Some(ref post) => {
            let table = config.result_table(post.table.as_ref())?;
            report.record(postclassify(pool, &post.target(table), &post.pipeline()).await?);
        }
        None => report.record(StageOutcome::skipped("postclassification")),
    }

    match pipeline.legend {
        Some(ref legend) => {
            let table = config.result_table(legend.table.as_ref())?;
            report.record(apply_legend(pool, &table, legend).await?);
        }
        None => report.record(StageOutcome::skipped("legend")),
    }

    match pipeline.publish {
        Some(ref spec) => report.record(publish(pool, spec).await?),
        None => report.record(StageOutcome::skipped("publish")),
    }

    match pipeline.merge {
        Some(ref merge) => report.record(merge_uncadastred(pool, merge).await?),
        None => report.record(StageOutcome::skipped("merge uncadastred")),
    }

    Ok(())
}
