//! Portable-bundle support.
//!
//! The tool ships as a directory containing the binary, an adjacent config
//! file, and a `bin/` directory of statically linked helper tools. Helpers in
//! `bin/` must win over host copies, so `bin/` is prepended to PATH once at
//! startup.

use std::env;
use std::path::PathBuf;

use log::{debug, warn};

use crate::constants::OPTIONAL_TOOLS;
use crate::exec::have_binary;

/// Directory containing the running executable; falls back to the current
/// directory when the executable path cannot be resolved.
pub fn bundle_root() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Prepend the bundle's `bin/` directory to PATH so bundled helpers are
/// preferred. Applied once at startup; a no-op when the directory is absent.
pub fn prepend_bin_to_path() {
    let bin_dir = bundle_root().join("bin");
    if !bin_dir.is_dir() {
        return;
    }
    let current = env::var_os("PATH").unwrap_or_default();
    let mut paths = vec![bin_dir.clone()];
    paths.extend(env::split_paths(&current));
    match env::join_paths(paths) {
        Ok(joined) => {
            env::set_var("PATH", &joined);
            debug!("Prepended {} to PATH", bin_dir.display());
        }
        Err(e) => warn!("Could not prepend {} to PATH: {e}", bin_dir.display()),
    }
}

/// Warn about missing optional helper tools; the run proceeds and the
/// corresponding layers or filesystems simply stay unavailable.
pub fn report_missing_tools() {
    for (tool, purpose) in OPTIONAL_TOOLS {
        if !have_binary(tool) {
            warn!("Optional tool {tool} not found; {purpose} unavailable");
        }
    }
}
