//! Per-tick summaries appended to `.rover/ticks.jsonl`.
//!
//! One JSON object per line. The log is a product artifact, independent of
//! `RUST_LOG` tracing output.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::{Millis, Position};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: u64,
    pub at: Millis,
    pub spins: u32,
    pub catches: u32,
    pub releases: u32,
    pub promotions: u32,
    pub recycled: u32,
    pub eggs_hatched: u32,
    pub incubators_loaded: u32,
    pub xp: u64,
    pub position: Option<Position>,
    pub softbanned: bool,
}

/// One line of the tick log: the summary plus the positions walked through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickLogEntry {
    #[serde(flatten)]
    pub summary: TickSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<Position>,
}

pub fn append_tick(path: &Path, summary: &TickSummary, trace: &[Position]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let entry = TickLogEntry {
        summary: summary.clone(),
        trace: trace.to_vec(),
    };
    let mut line = serde_json::to_string(&entry).context("serialize tick summary")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open tick log {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append tick log {}", path.display()))
}

/// Read every entry. A missing log is empty.
pub fn read_ticks(path: &Path) -> Result<Vec<TickLogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read tick log {}", path.display()))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse tick log {} line {}", path.display(), idx + 1))
        })
        .collect()
}
