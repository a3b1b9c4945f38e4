//! Initialization helpers for `.rover/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{AgentConfig, write_config};

/// All canonical paths within `.rover/` for a working root.
#[derive(Debug, Clone)]
pub struct RoverPaths {
    pub root: PathBuf,
    pub rover_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub session_path: PathBuf,
    pub tick_log_path: PathBuf,
}

impl RoverPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let rover_dir = root.join(".rover");
        Self {
            root: root.clone(),
            rover_dir: rover_dir.clone(),
            gitignore_path: rover_dir.join(".gitignore"),
            config_path: rover_dir.join("config.toml"),
            session_path: rover_dir.join("session.json"),
            tick_log_path: rover_dir.join("ticks.jsonl"),
        }
    }
}

/// Options for `init_rover`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config with defaults.
    pub force: bool,
}

/// Create `.rover/` scaffolding in `root` with a default config.
///
/// Fails if `.rover/` already exists unless `options.force` is set. Forcing
/// resets the config but leaves the session snapshot and tick log alone.
pub fn init_rover(root: &Path, options: &InitOptions) -> Result<RoverPaths> {
    let paths = RoverPaths::new(root);
    if paths.rover_dir.exists() && !options.force {
        return Err(anyhow!(
            "rover init: .rover already exists (use --force to overwrite)"
        ));
    }
    if paths.rover_dir.exists() && !paths.rover_dir.is_dir() {
        return Err(anyhow!("rover init: .rover exists but is not a directory"));
    }

    fs::create_dir_all(&paths.rover_dir)
        .with_context(|| format!("create directory {}", paths.rover_dir.display()))?;
    fs::write(&paths.gitignore_path, ROVER_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &AgentConfig::default())?;

    Ok(paths)
}

const ROVER_GITIGNORE: &str = "session.json\nticks.jsonl\n";
