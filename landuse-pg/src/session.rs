//! Session GRASS GIS: environnement des sous-processus et arborescence
//!
//! L'environnement est une valeur explicite appliquée à chaque commande
//! lancée; le processus courant n'est jamais modifié.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::GrassConfig;
use crate::db::DatabaseConfig;
use crate::error::{IoContext, PipelineError, Result};
use crate::tools::{pg_env, ToolCommand};

/// Fichier de région d'un mapset
const WIND: &str = "WIND";

/// Variables d'environnement d'une session
#[derive(Debug, Clone)]
pub struct SessionEnv {
    vars: Vec<(String, String)>,
}

impl SessionEnv {
    /// Construit l'environnement à partir des variables du processus courant
    pub fn from_process(grass: &GrassConfig, db: &DatabaseConfig) -> Self {
        Self::build(grass, db, |key| std::env::var(key).ok())
    }

    /// Construit l'environnement; `inherited` fournit les valeurs existantes
    pub fn build<F>(grass: &GrassConfig, db: &DatabaseConfig, inherited: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = &grass.gisbase;
        let sub = |parts: &[&str]| -> String {
            parts
                .iter()
                .fold(base.to_path_buf(), |p, part| p.join(part))
                .display()
                .to_string()
        };
        let append = |key: &str, extra: Vec<String>| -> String {
            let mut parts: Vec<String> = inherited(key)
                .filter(|v| !v.is_empty())
                .into_iter()
                .collect();
            parts.extend(extra);
            parts.join(":")
        };

        let home = inherited("HOME").unwrap_or_default();
        let mut vars = vec![
            ("GISBASE".to_string(), base.display().to_string()),
            (
                "PATH".to_string(),
                append("PATH", vec![sub(&["bin"]), sub(&["scripts"]), sub(&["lib"])]),
            ),
            (
                "PYTHONPATH".to_string(),
                append(
                    "PYTHONPATH",
                    vec![
                        sub(&["etc", "python"]),
                        sub(&["etc", "python", "grass"]),
                        sub(&["etc", "python", "grass", "script"]),
                    ],
                ),
            ),
            ("LD_LIBRARY_PATH".to_string(), append("LD_LIBRARY_PATH", vec![sub(&["lib"])])),
            (
                "GISRC".to_string(),
                Path::new(&home).join(".grass7").join("rc").display().to_string(),
            ),
            ("GIS_LOCK".to_string(), std::process::id().to_string()),
        ];
        if let Some(ref pythonlib) = grass.pythonlib {
            vars.push(("PYTHONLIB".to_string(), pythonlib.display().to_string()));
        }
        vars.extend(pg_env(db));
        Self { vars }
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Lignes `CLE=valeur`, mot de passe masqué
    pub fn display_lines(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|(k, v)| {
                if k == "PGPASSWORD" {
                    format!("{}=****", k)
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect()
    }

    /// Commande lancée dans cet environnement
    pub fn command(&self, program: &str) -> ToolCommand {
        ToolCommand::new(program).envs(self.vars.iter().cloned())
    }

    fn gisrc(&self) -> Option<PathBuf> {
        self.get("GISRC").map(PathBuf::from)
    }
}

/// Crée un dossier s'il n'existe pas
pub fn ensure_dir(path: &Path) -> Result<String> {
    if path.is_dir() {
        return Ok(format!("Folder '{}' already exists", path.display()));
    }
    std::fs::create_dir_all(path).io_context(path)?;
    Ok(format!("Folder '{}' created", path.display()))
}

/// Crée le dossier GRASSDATA s'il n'existe pas
pub fn ensure_gisdb(gisdb: &Path) -> Result<String> {
    if gisdb.exists() {
        return Ok("GRASSDATA folder already exists".to_string());
    }
    std::fs::create_dir_all(gisdb).io_context(gisdb)?;
    Ok(format!("GRASSDATA folder created in '{}'", gisdb.display()))
}

/// Commande de création d'une location
pub fn create_location_command(env: &SessionEnv, gisdb: &Path, location: &str, epsg: u32) -> ToolCommand {
    env.command("grass")
        .arg("-c")
        .arg(format!("EPSG:{}", epsg))
        .arg("-e")
        .arg(gisdb.join(location).display().to_string())
        .tolerate_stderr()
}

/// Crée une location GRASS si elle n'existe pas
pub async fn ensure_location(env: &SessionEnv, gisdb: &Path, location: &str, epsg: u32) -> Result<String> {
    if gisdb.join(location).exists() {
        return Ok(format!("Location '{}' already exists", location));
    }
    create_location_command(env, gisdb, location, epsg).run().await?;
    Ok(format!("Location '{}' created", location))
}

/// Crée un mapset en copiant la région de PERMANENT
///
/// Un PERMANENT absent ou sans `WIND` est signalé sans échec.
pub fn ensure_mapset(gisdb: &Path, location: &str, mapset: &str) -> Result<String> {
    let location_dir = gisdb.join(location);
    let permanent = location_dir.join("PERMANENT");
    if !permanent.is_dir() {
        let message = "WARNING: 'PERMANENT' mapset does not exist".to_string();
        warn!(location = %location, "{}", message);
        return Ok(message);
    }
    let wind = permanent.join(WIND);
    if !wind.is_file() {
        let message = "WARNING: 'PERMANENT' mapset exists but its 'WIND' file is missing".to_string();
        warn!(location = %location, "{}", message);
        return Ok(message);
    }

    let target = location_dir.join(mapset);
    if target.exists() {
        return Ok(format!("'{}' mapset already exists in location '{}'", mapset, location));
    }
    std::fs::create_dir_all(&target).io_context(&target)?;
    let target_wind = target.join(WIND);
    std::fs::copy(&wind, &target_wind).io_context(&target_wind)?;
    Ok(format!("'{}' mapset created in location '{}'", mapset, location))
}

/// Ouvre une session de travail dans un mapset
///
/// Location et mapset sont créés au besoin, puis le fichier `GISRC` est
/// écrit pour que les commandes GRASS suivantes travaillent dans ce mapset.
pub async fn launch_mapset(env: &SessionEnv, grass: &GrassConfig, epsg: u32, mapset: &str) -> Result<Vec<String>> {
    let mut messages = vec![
        ensure_location(env, &grass.gisdb, &grass.location, epsg).await?,
        ensure_mapset(&grass.gisdb, &grass.location, mapset)?,
    ];

    let mapset_dir = grass.gisdb.join(&grass.location).join(mapset);
    if !mapset_dir.is_dir() {
        messages.push(format!(
            "'{}' mapset doesn't exist in '{}'",
            mapset,
            grass.gisdb.display()
        ));
        return Ok(messages);
    }

    let gisrc = env
        .gisrc()
        .ok_or_else(|| PipelineError::config("GISRC is not set in the session environment"))?;
    if let Some(parent) = gisrc.parent() {
        std::fs::create_dir_all(parent).io_context(parent)?;
    }
    let content = format!(
        "GISDBASE: {}\nLOCATION_NAME: {}\nMAPSET: {}\nGUI: text\n",
        grass.gisdb.display(),
        grass.location,
        mapset
    );
    std::fs::write(&gisrc, content).io_context(&gisrc)?;
    messages.push(format!("You are now working in mapset '{}/{}'", grass.location, mapset));

    for message in &messages {
        info!("{}", message);
    }
    Ok(messages)
}

/// Installe une extension GRASS si elle est absente
pub async fn ensure_addon(env: &SessionEnv, addon: &str) -> Result<String> {
    let listing = env.command("g.extension").arg("-a").tolerate_stderr().run().await?;
    if addon_listed(&listing.stdout, addon) {
        return Ok(format!("{} is already installed", addon));
    }
    env.command("g.extension")
        .arg(format!("extension={}", addon))
        .tolerate_stderr()
        .run()
        .await?;
    Ok(format!("{} has been installed", addon))
}

fn addon_listed(listing: &str, addon: &str) -> bool {
    listing.lines().any(|line| line.trim() == addon)
}
