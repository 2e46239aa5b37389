//! Outils externes (psql, shp2pgsql, ogr2ogr, pg_dump, grass...)
//!
//! Les commandes sont lancées avec un vecteur d'arguments, sans shell, sur le
//! pool de threads bloquants de tokio. Le mot de passe passe par
//! `PGPASSWORD` et n'apparaît jamais dans les logs.

pub mod backup;
pub mod export;

use std::io::Read;
use std::process::{Command, Output, Stdio};

use tracing::{debug, info};

use crate::db::DatabaseConfig;
use crate::error::{PipelineError, Result};

/// Variables d'environnement masquées dans les logs
const SECRET_VARS: [&str; 1] = ["PGPASSWORD"];

/// Sorties d'un outil terminé avec succès
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Commande externe
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    fail_on_stderr: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            fail_on_stderr: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Une sortie d'erreur non vide n'est pas un échec (messages informatifs)
    pub fn tolerate_stderr(mut self) -> Self {
        self.fail_on_stderr = false;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Valeur d'une variable passée à la commande
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Ligne de commande affichable, secrets masqués
    pub fn command_line(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .filter(|(k, _)| SECRET_VARS.contains(&k.as_str()))
            .map(|(k, _)| format!("{}=****", k))
            .collect();
        parts.push(shell_quote(&self.program));
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }

    fn build(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        command
    }

    fn spawn_error(&self, e: std::io::Error) -> PipelineError {
        PipelineError::Tool {
            tool: self.program.clone(),
            status: "not started".to_string(),
            stderr: e.to_string(),
        }
    }

    fn check(&self, output: Output) -> Result<ToolOutput> {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let failed = !output.status.success() || (self.fail_on_stderr && !stderr.trim().is_empty());
        if failed {
            return Err(PipelineError::Tool {
                tool: self.program.clone(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        if !stdout.is_empty() {
            debug!(tool = %self.program, stdout = %stdout.trim_end(), "Tool output");
        }
        Ok(ToolOutput { stdout, stderr })
    }

    /// Exécute la commande et attend sa fin (bloquant)
    pub fn run_blocking(&self) -> Result<ToolOutput> {
        info!(command = %self.command_line(), "Running external command");
        let output = self
            .build()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;
        self.check(output)
    }

    /// Exécute la commande sur le pool de threads bloquants
    pub async fn run(self) -> Result<ToolOutput> {
        let program = self.program.clone();
        tokio::task::spawn_blocking(move || self.run_blocking())
            .await
            .map_err(|e| join_error(&program, e))?
    }
}

fn join_error(program: &str, e: tokio::task::JoinError) -> PipelineError {
    PipelineError::Tool {
        tool: program.to_string(),
        status: "aborted".to_string(),
        stderr: e.to_string(),
    }
}

/// `producer | consumer`: le statut du producteur est vérifié, pas sa sortie d'erreur
pub async fn pipe(producer: ToolCommand, consumer: ToolCommand) -> Result<ToolOutput> {
    let program = consumer.program.clone();
    tokio::task::spawn_blocking(move || pipe_blocking(&producer, &consumer))
        .await
        .map_err(|e| join_error(&program, e))?
}

fn pipe_blocking(producer: &ToolCommand, consumer: &ToolCommand) -> Result<ToolOutput> {
    info!(
        command = %format!("{} | {}", producer.command_line(), consumer.command_line()),
        "Running external pipeline"
    );
    let mut first = producer
        .build()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| producer.spawn_error(e))?;
    let Some(stream) = first.stdout.take() else {
        return Err(PipelineError::Tool {
            tool: producer.program.clone(),
            status: "no stdout".to_string(),
            stderr: String::new(),
        });
    };

    // Vidé en parallèle: un producteur bavard bloquerait sinon sur son stderr
    let drain = first.stderr.take().map(|mut stderr| {
        std::thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = stderr.read_to_end(&mut buffer);
            buffer
        })
    });

    let second = match consumer
        .build()
        .stdin(Stdio::from(stream))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let _ = first.kill();
            let _ = first.wait();
            return Err(consumer.spawn_error(e));
        }
    };

    let consumer_output = second.wait_with_output().map_err(|e| consumer.spawn_error(e))?;
    let status = first.wait().map_err(|e| producer.spawn_error(e))?;
    let stderr = drain
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    let producer_output = Output {
        status,
        stdout: Vec::new(),
        stderr,
    };

    // Le producteur écrit ses messages de progression sur stderr
    producer.clone().tolerate_stderr().check(producer_output)?;
    consumer.check(consumer_output)
}

/// Variables libpq d'une connexion (le mot de passe inclus, masqué dans les logs)
pub fn pg_env(db: &DatabaseConfig) -> Vec<(String, String)> {
    let mut vars = vec![
        ("PGHOST".to_string(), db.host.clone()),
        ("PGPORT".to_string(), db.port.to_string()),
        ("PGUSER".to_string(), db.user.clone()),
        ("PGDATABASE".to_string(), db.dbname.clone()),
        ("PGSSLMODE".to_string(), db.ssl_mode.as_libpq().to_string()),
    ];
    if let Some(ref password) = db.password {
        vars.push(("PGPASSWORD".to_string(), password.clone()));
    }
    vars
}

/// Arguments de connexion des outils PostgreSQL (`-h -p -U -d`)
pub fn pg_connection_args(db: &DatabaseConfig) -> Vec<String> {
    vec![
        "-h".to_string(),
        db.host.clone(),
        "-p".to_string(),
        db.port.to_string(),
        "-U".to_string(),
        db.user.clone(),
        "-d".to_string(),
        db.dbname.clone(),
    ]
}

/// Chaîne de connexion GDAL, sans mot de passe
pub fn gdal_pg_source(db: &DatabaseConfig) -> String {
    format!(
        "PG:host={} port={} user={} dbname={}",
        db.host, db.port, db.user, db.dbname
    )
}

fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> DatabaseConfig {
        DatabaseConfig {
            password: Some("s3cret".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_command_line_masks_password() {
        let cmd = ToolCommand::new("psql")
            .args(pg_connection_args(&db()))
            .envs(pg_env(&db()))
            .arg("-c")
            .arg("SELECT 'a b'");
        let line = cmd.command_line();
        assert!(line.starts_with("PGPASSWORD=**** psql -h localhost -p 5432 -U postgres -d walous"));
        assert!(line.ends_with("-c 'SELECT '\\''a b'\\'''"));
        assert!(!line.contains("s3cret"));
        assert_eq!(cmd.env_value("PGPASSWORD"), Some("s3cret"));
    }

    #[test]
    fn test_gdal_source_has_no_password() {
        assert_eq!(
            gdal_pg_source(&db()),
            "PG:host=localhost port=5432 user=postgres dbname=walous"
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_error() {
        let err = ToolCommand::new("definitely-not-a-real-binary-xyz").run().await.unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_is_failure_unless_tolerated() {
        let noisy = ToolCommand::new("sh").args(["-c", "echo warning >&2"]);
        assert!(noisy.clone().run().await.is_err());
        let out = noisy.tolerate_stderr().run().await.unwrap();
        assert_eq!(out.stderr.trim(), "warning");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe() {
        let producer = ToolCommand::new("sh").args(["-c", "echo progress >&2; printf 'a\\nb\\n'"]);
        let consumer = ToolCommand::new("wc").arg("-l");
        let out = pipe(producer, consumer).await.unwrap();
        assert_eq!(out.stdout.trim(), "2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_drains_large_producer_stderr() {
        // Plus qu'un tampon de pipe sur stderr avant la moindre sortie
        let producer = ToolCommand::new("sh").args([
            "-c",
            "head -c 262144 /dev/zero | tr '\\0' x >&2; echo done",
        ]);
        let consumer = ToolCommand::new("cat");
        let out = tokio::time::timeout(std::time::Duration::from_secs(30), pipe(producer, consumer))
            .await
            .expect("pipeline blocked")
            .unwrap();
        assert_eq!(out.stdout.trim(), "done");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_reports_failing_producer() {
        let producer = ToolCommand::new("sh").args(["-c", "echo broken >&2; exit 3"]);
        let consumer = ToolCommand::new("cat");
        let err = pipe(producer, consumer).await.unwrap_err();
        match err {
            PipelineError::Tool { tool, stderr, .. } => {
                assert_eq!(tool, "sh");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
