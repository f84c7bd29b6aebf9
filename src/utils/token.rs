//! Stable short host identifier embedded in archive names and remote paths.
//!
//! Preference order: `/etc/machine-id`, DMI product UUID, hostname plus the
//! first stable interface MAC. If none of those yield anything, a random
//! token is generated once and persisted to the spool directory so reruns
//! from the same live USB keep their naming.

use std::fs;
use std::path::Path;

use anyhow::Context;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::TOKEN_FILE_NAME;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const TOKEN_LEN: usize = 5;

/// Deterministic 5-char base36 token from sha256 of the input.
pub fn base36_digest5(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut n = u64::from_be_bytes(digest[..8].try_into().expect("8 byte prefix"));
    let mut out = String::with_capacity(TOKEN_LEN);
    for _ in 0..TOKEN_LEN {
        out.push(BASE36[(n % 36) as usize] as char);
        n /= 36;
    }
    out
}

fn read_first_nonempty(paths: &[&str]) -> Option<String> {
    for path in paths {
        if let Ok(content) = fs::read_to_string(path) {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn first_stable_mac() -> Option<String> {
    let mut macs: Vec<String> = Vec::new();
    let entries = fs::read_dir("/sys/class/net").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "lo" {
            continue;
        }
        if let Ok(mac) = fs::read_to_string(entry.path().join("address")) {
            let mac = mac.trim().to_string();
            if !mac.is_empty() && mac != "00:00:00:00:00:00" {
                macs.push(mac);
            }
        }
    }
    macs.sort();
    macs.into_iter().next()
}

/// Machine identity string according to the configured source.
fn host_identifier(token_source: &str, spool_dir: &Path) -> String {
    if token_source == "machine-id" {
        if let Some(id) =
            read_first_nonempty(&["/etc/machine-id", "/sys/class/dmi/id/product_uuid"])
        {
            return id;
        }
    }
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();
    if let Some(mac) = first_stable_mac() {
        return format!("{host}:{mac}");
    }
    if !host.is_empty() {
        return host;
    }
    persisted_random_token(spool_dir)
}

/// Random identity persisted in the spool so reruns stay stable.
fn persisted_random_token(spool_dir: &Path) -> String {
    let token_path = spool_dir.join(TOKEN_FILE_NAME);
    if let Ok(existing) = fs::read_to_string(&token_path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return existing.to_string();
        }
    }
    let fresh = Uuid::new_v4().to_string();
    if let Err(e) = fs::create_dir_all(spool_dir)
        .context("create spool dir")
        .and_then(|_| fs::write(&token_path, &fresh).context("write token file"))
    {
        warn!("Could not persist host token to {}: {e}", token_path.display());
    }
    fresh
}

/// Derive the run token from the date string and host identity.
pub fn derive_token(token_source: &str, date_str: &str, spool_dir: &Path) -> String {
    let identity = host_identifier(token_source, spool_dir);
    let token = base36_digest5(&format!("{date_str}:{identity}"));
    debug!("Derived host token {token}");
    token
}

/// Hostname for the run summary; falls back to the literal `unknown`.
pub fn run_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn token_is_five_base36_chars() {
        let token = base36_digest5("20260101:abcdef");
        assert_eq!(token.len(), 5);
        assert!(token.bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn token_is_deterministic_and_input_sensitive() {
        assert_eq!(base36_digest5("a"), base36_digest5("a"));
        assert_ne!(base36_digest5("20260101:x"), base36_digest5("20260102:x"));
    }

    #[test]
    fn persisted_token_survives_reruns() {
        let dir = TempDir::new().unwrap();
        let first = persisted_random_token(dir.path());
        let second = persisted_random_token(dir.path());
        assert_eq!(first, second);
        assert!(dir.path().join(TOKEN_FILE_NAME).exists());
    }

    #[test]
    fn derive_token_stable_for_same_date() {
        let dir = TempDir::new().unwrap();
        let a = derive_token("machine-id", "20260101", dir.path());
        let b = derive_token("machine-id", "20260101", dir.path());
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
    }
}
