//! Cross-cutting helpers: directory creation, atomic JSON writes, size
//! formatting, and the hashing/token submodules.

pub mod hash;
pub mod token;

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Create a directory and its parents, with a readable error.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .context(format!("Cannot create directory {}", path.display()))
}

/// Write pretty JSON atomically: temp file, fsync, rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)
            .context(format!("Failed to create {}", tmp.display()))?;
        file.write_all(json.as_bytes())
            .context(format!("Failed to write {}", tmp.display()))?;
        file.sync_all()
            .context(format!("Failed to sync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .context(format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Bytes rendered as GiB with one decimal, for the plan table.
pub fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}
