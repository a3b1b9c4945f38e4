//! Side effects: remote calls, time, and the `.rover/` directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod cells;
pub mod clock;
pub mod config;
pub mod init;
pub mod remote;
pub mod retry;
pub mod session_store;
pub mod sim_world;
pub mod tick_log;

/// Replace `path` with `contents` via a sibling temp file and rename.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
