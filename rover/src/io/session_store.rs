//! Session snapshot storage (`.rover/session.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{Millis, Position};
use crate::io::config::AgentConfig;

/// The config values a snapshot was taken under, for `rover show`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigEcho {
    pub location: Position,
    pub speed_kmh: f64,
    pub power_quotient: u32,
    pub revisit_interval_secs: u64,
}

impl From<&AgentConfig> for ConfigEcho {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            location: cfg.location,
            speed_kmh: cfg.speed_kmh,
            power_quotient: cfg.power_quotient,
            revisit_interval_secs: cfg.revisit_interval_secs,
        }
    }
}

/// Persisted state needed to resume a session.
///
/// The POI store is not persisted; it is rebuilt from scans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub position: Position,
    pub heading_deg: f64,
    /// Stop id -> last visit.
    pub visited: BTreeMap<String, Millis>,
    pub softban_until: Option<Millis>,
    /// Ticks completed across all runs.
    pub ticks: u64,
    pub saved_at: Millis,
    pub config: ConfigEcho,
}

/// Load the snapshot, or `None` when no session has been saved yet.
pub fn load_session(path: &Path) -> Result<Option<SessionSnapshot>> {
    if !path.exists() {
        debug!(path = %path.display(), "no session snapshot");
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read session {}", path.display()))?;
    let snapshot: SessionSnapshot = serde_json::from_str(&contents)
        .with_context(|| format!("parse session {}", path.display()))?;
    debug!(ticks = snapshot.ticks, visited = snapshot.visited.len(), "session loaded");
    Ok(Some(snapshot))
}

/// Atomically write the snapshot to disk (temp file + rename).
pub fn write_session(path: &Path, snapshot: &SessionSnapshot) -> Result<()> {
    debug!(path = %path.display(), ticks = snapshot.ticks, "writing session");
    let mut buf = serde_json::to_string_pretty(snapshot).context("serialize session")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
