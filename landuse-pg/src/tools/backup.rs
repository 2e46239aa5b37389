//! Sauvegarde et restauration (`pg_dump` / `pg_restore`)
//!
//! Chaque archive est accompagnée d'un fichier `<archive>.blake3` contenant
//! son empreinte. La restauration vérifie l'empreinte quand le fichier existe.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use landuse_sql::TableRef;

use crate::db::DatabaseConfig;
use crate::error::{IoContext, PipelineError, Result};
use crate::tools::{pg_connection_args, pg_env, ToolCommand};

/// Extension du fichier d'empreinte
pub const CHECKSUM_EXTENSION: &str = "blake3";

/// Options de `pg_restore`
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Supprime les objets existants avant de les recréer
    pub clean: bool,
    /// Restaure même si l'empreinte ne correspond pas
    pub skip_checksum: bool,
    /// Nombre de processus de restauration parallèles
    pub jobs: Option<usize>,
}

/// Commande de sauvegarde d'une table
pub fn dump_table_command(db: &DatabaseConfig, table: &TableRef, file: &Path) -> ToolCommand {
    ToolCommand::new("pg_dump")
        .args(pg_connection_args(db))
        .arg("-t")
        .arg(table.to_string())
        .args(["-Fc", "-f"])
        .arg(file.display().to_string())
        .envs(pg_env(db))
}

/// Commande de sauvegarde de la base complète
pub fn dump_db_command(db: &DatabaseConfig, file: &Path) -> ToolCommand {
    ToolCommand::new("pg_dump")
        .args(pg_connection_args(db))
        .args(["-Fc", "-f"])
        .arg(file.display().to_string())
        .envs(pg_env(db))
}

/// Commande de restauration d'une archive
pub fn restore_command(db: &DatabaseConfig, file: &Path, options: RestoreOptions) -> ToolCommand {
    let mut command = ToolCommand::new("pg_restore");
    if options.clean {
        command = command.args(["--clean", "--if-exists"]);
    }
    if let Some(jobs) = options.jobs.filter(|&n| n > 1) {
        command = command.arg("-j").arg(jobs.to_string());
    }
    command
        .args(pg_connection_args(db))
        .arg(file.display().to_string())
        .envs(pg_env(db))
}

/// Sauvegarde une table puis écrit son empreinte
pub async fn dump_table(db: &DatabaseConfig, table: &TableRef, file: &Path) -> Result<String> {
    dump_table_command(db, table, file).run().await?;
    let checksum = write_checksum(file).await?;
    info!(table = %table, file = %file.display(), checksum = %checksum, "Table backup written");
    Ok(checksum)
}

/// Sauvegarde la base puis écrit son empreinte
pub async fn dump_db(db: &DatabaseConfig, file: &Path) -> Result<String> {
    dump_db_command(db, file).run().await?;
    let checksum = write_checksum(file).await?;
    info!(database = %db.dbname, file = %file.display(), checksum = %checksum, "Database backup written");
    Ok(checksum)
}

/// Vérifie l'empreinte puis restaure l'archive
pub async fn restore(db: &DatabaseConfig, file: &Path, options: RestoreOptions) -> Result<()> {
    if !file.is_file() {
        return Err(PipelineError::io(
            file,
            std::io::Error::new(std::io::ErrorKind::NotFound, "backup file not found"),
        ));
    }
    if options.skip_checksum {
        warn!(file = %file.display(), "Checksum verification skipped");
    } else {
        verify_checksum(file).await?;
    }
    restore_command(db, file, options).run().await?;
    info!(file = %file.display(), database = %db.dbname, "Backup restored");
    Ok(())
}

/// Chemin du fichier d'empreinte (`backup.dump` → `backup.dump.blake3`)
pub fn checksum_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(".");
    name.push(CHECKSUM_EXTENSION);
    PathBuf::from(name)
}

/// Calcule le checksum blake3 d'un fichier
pub fn compute_file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).io_context(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 65536]; // 64KB buffer

    loop {
        let bytes_read = file.read(&mut buffer).io_context(path)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

async fn checksum_blocking(file: &Path) -> Result<String> {
    let path = file.to_path_buf();
    tokio::task::spawn_blocking(move || compute_file_checksum(&path))
        .await
        .map_err(|e| PipelineError::io(file, std::io::Error::other(e)))?
}

/// Écrit `<fichier>.blake3` au format `<hex>  <nom>`
pub async fn write_checksum(file: &Path) -> Result<String> {
    let checksum = checksum_blocking(file).await?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar = checksum_path(file);
    std::fs::write(&sidecar, format!("{}  {}\n", checksum, name)).io_context(&sidecar)?;
    Ok(checksum)
}

/// Compare l'archive à son empreinte; absence d'empreinte = avertissement
pub async fn verify_checksum(file: &Path) -> Result<()> {
    let sidecar = checksum_path(file);
    if !sidecar.is_file() {
        warn!(file = %file.display(), "No checksum file, archive integrity not verified");
        return Ok(());
    }
    let content = std::fs::read_to_string(&sidecar).io_context(&sidecar)?;
    let expected = content.split_whitespace().next().unwrap_or_default().to_ascii_lowercase();
    let actual = checksum_blocking(file).await?;
    if expected != actual {
        return Err(PipelineError::config(format!(
            "Checksum mismatch for {}: expected {}, got {}",
            file.display(),
            expected,
            actual
        )));
    }
    info!(file = %file.display(), "Checksum verified");
    Ok(())
}
