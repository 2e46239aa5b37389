//! Rapport d'exécution du pipeline
//!
//! Chaque étape produit un [`StageOutcome`]; le rapport les agrège pour
//! l'affichage final et la sauvegarde en JSON.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use landuse_sql::format_elapsed;

use crate::error::{IoContext, PipelineError, Result};

/// Issue d'une étape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageStatus {
    /// Toutes les requêtes ont été validées
    Committed,
    /// Transaction annulée
    RolledBack,
    /// Étape absente de la configuration
    Skipped,
}

/// Résultat d'une étape
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: String,
    /// Nombre de requêtes exécutées
    pub statements: usize,
    /// Lignes affectées (UPDATE, INSERT, COPY)
    pub rows_affected: u64,
    pub duration_secs: f64,
    pub status: StageStatus,
}

impl StageOutcome {
    pub fn skipped(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            statements: 0,
            rows_affected: 0,
            duration_secs: 0.0,
            status: StageStatus::Skipped,
        }
    }

    /// Cumule une sous-étape dans l'étape courante
    pub fn absorb(&mut self, other: StageOutcome) {
        self.statements += other.statements;
        self.rows_affected += other.rows_affected;
        self.duration_secs += other.duration_secs;
        if other.status == StageStatus::RolledBack {
            self.status = StageStatus::RolledBack;
        }
    }
}

/// Statut global de l'exécution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    Failed,
}

/// Rapport complet d'une exécution
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Configuration utilisée (preset ou chemin)
    pub config: String,
    pub duration_secs: f64,
    pub status: RunStatus,
    pub stages: Vec<StageOutcome>,
    /// Erreur fatale ayant interrompu l'exécution
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(config: &str) -> Self {
        Self {
            config: config.to_string(),
            duration_secs: 0.0,
            status: RunStatus::Success,
            stages: Vec::new(),
            error: None,
        }
    }

    pub fn record(&mut self, outcome: StageOutcome) {
        self.stages.push(outcome);
    }

    pub fn record_failure(&mut self, error: &PipelineError) {
        self.status = RunStatus::Failed;
        self.error = Some(error.to_string());
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Lignes affectées, toutes étapes confondues
    pub fn total_rows(&self) -> u64 {
        self.stages.iter().map(|s| s.rows_affected).sum()
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("RUN REPORT - {}", self.config);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!(
            "Duration: {}",
            format_elapsed(Duration::from_secs_f64(self.duration_secs))
        );

        println!("\n--- STAGES ---");
        for s in &self.stages {
            println!(
                "  {:<28} {:<10} {:>4} statements {:>10} rows  {}",
                s.stage,
                format!("{:?}", s.status),
                s.statements,
                s.rows_affected,
                format_elapsed(Duration::from_secs_f64(s.duration_secs))
            );
        }

        if let Some(ref error) = self.error {
            println!("\n--- ERROR ---");
            println!("  {}", error);
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::config(format!("Cannot serialize report: {}", e)))?;
        std::fs::write(path, json).io_context(path)?;
        Ok(())
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        let committed = self
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Committed)
            .count();
        format!(
            "{}: {} stages committed, {} skipped, {} rows affected",
            self.config,
            committed,
            self.stages.iter().filter(|s| s.status == StageStatus::Skipped).count(),
            self.total_rows()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(stage: &str, rows: u64) -> StageOutcome {
        StageOutcome {
            stage: stage.to_string(),
            statements: 2,
            rows_affected: rows,
            duration_secs: 1.5,
            status: StageStatus::Committed,
        }
    }

    #[test]
    fn test_summary() {
        let mut report = RunReport::new("walous");
        report.record(outcome("overlay", 0));
        report.record(outcome("classification", 120));
        report.record(StageOutcome::skipped("publish"));

        assert_eq!(report.total_rows(), 120);
        assert_eq!(
            report.summary(),
            "walous: 2 stages committed, 1 skipped, 120 rows affected"
        );
    }

    #[test]
    fn test_absorb() {
        let mut total = outcome("postclassification", 3);
        let mut failed = outcome("residential-density", 0);
        failed.status = StageStatus::RolledBack;
        total.absorb(outcome("garden-adjacency", 7));
        total.absorb(failed);

        assert_eq!(total.rows_affected, 10);
        assert_eq!(total.statements, 6);
        assert_eq!(total.status, StageStatus::RolledBack);
    }

    #[test]
    fn test_failure_and_save() {
        let mut report = RunReport::new("config.json");
        report.record_failure(&PipelineError::config("boom"));
        assert_eq!(report.status, RunStatus::Failed);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.save_to_file(&path).unwrap();
        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["status"], "Failed");
        assert_eq!(saved["error"], "Configuration error: boom");
    }
}
