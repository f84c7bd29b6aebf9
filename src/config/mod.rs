//! Configuration management.
//!
//! Loads the TOML configuration with serde defaults for every optional key.
//! Search order: explicit `--config` path, then a file adjacent to the
//! executable, then `/etc/rs-salvage.toml`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::constants::CONFIG_FILE_NAME;
use crate::utils::hash::HashAlgo;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub integrity: IntegrityConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Remote target in `user@host:/base/path` form.
    #[serde(default)]
    pub remote: String,

    /// Private key used to authenticate to the archival target.
    #[serde(default)]
    pub ssh_key: PathBuf,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Preferred compressor: `zstd` or `pigz`.
    #[serde(default = "default_compressor")]
    pub compressor: String,

    /// Compression level, 1-9.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Chunk size in MiB; 0 disables chunking (single part).
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,

    /// Local directory where chunks accumulate before shipping.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,

    /// Preserve extended attributes and ACLs in the archive.
    #[serde(default = "default_true")]
    pub preserve_xattrs: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Allow list of filesystem types; empty means no restriction.
    #[serde(default)]
    pub include_fstypes: Vec<String>,

    /// Deny list of filesystem types.
    #[serde(default = "default_skip_fstypes")]
    pub skip_fstypes: Vec<String>,

    #[serde(default = "default_true")]
    pub skip_if_encrypted: bool,

    #[serde(default = "default_true")]
    pub allow_lvm: bool,

    #[serde(default = "default_true")]
    pub allow_raid: bool,

    #[serde(default = "default_min_partition_size_gb")]
    pub min_partition_size_gb: u64,

    /// Kernel names (no `/dev/` prefix) to never touch.
    #[serde(default)]
    pub avoid_devices: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Files strictly larger than this are excluded; 0 archives structure only.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker count; 0 derives from CPU count.
    #[serde(default)]
    pub workers: usize,

    /// Outbound bandwidth cap in KiB/s; 0 disables the cap.
    #[serde(default)]
    pub bwlimit_kbps: u64,

    /// Level for the on-disk log: error, warn, info, debug, trace.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default = "default_date_fmt")]
    pub date_fmt: String,

    /// Source of the stable host token: currently `machine-id`.
    #[serde(default = "default_token_source")]
    pub token_source: String,

    /// Archive base name pattern with `{date}`, `{token}`, `{disk}`, `{part}`.
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_run_summary_dir")]
    pub run_summary_dir: PathBuf,

    #[serde(default = "default_true")]
    pub per_volume_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }
}

fn default_port() -> u16 {
    22
}

fn default_compressor() -> String {
    "zstd".to_string()
}

fn default_compression_level() -> u32 {
    3
}

fn default_chunk_size_mb() -> u64 {
    4096
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("/var/tmp/rs-salvage")
}

fn default_true() -> bool {
    true
}

fn default_skip_fstypes() -> Vec<String> {
    // Member partitions surface again as their assembled layer volume;
    // mounting the raw member would fail or double-capture.
    ["swap", "linux_raid_member", "LVM2_member", "crypto_LUKS", "iso9660"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_min_partition_size_gb() -> u64 {
    256
}

fn default_max_file_size_mb() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_date_fmt() -> String {
    "%Y%m%d".to_string()
}

fn default_token_source() -> String {
    "machine-id".to_string()
}

fn default_pattern() -> String {
    "{date}_{token}_d{disk}_p{part}".to_string()
}

fn default_algorithm() -> String {
    "sha256".to_string()
}

fn default_run_summary_dir() -> PathBuf {
    PathBuf::from("/var/log/rs-salvage")
}

impl Config {
    /// Parse and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .context(format!("Failed to parse TOML config: {}", path.display()))?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reject values the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        match self.archive.compressor.as_str() {
            "zstd" | "pigz" => {}
            other => {
                return Err(anyhow!(
                    "archive.compressor must be \"zstd\" or \"pigz\", got \"{other}\""
                ))
            }
        }
        if !(1..=9).contains(&self.archive.compression_level) {
            return Err(anyhow!(
                "archive.compression_level must be 1-9, got {}",
                self.archive.compression_level
            ));
        }
        self.hash_algo()?;
        if self.naming.pattern.trim().is_empty() {
            return Err(anyhow!("naming.pattern must not be empty"));
        }
        Ok(())
    }

    /// The configured integrity algorithm as a constructor-backed variant.
    pub fn hash_algo(&self) -> Result<HashAlgo> {
        self.integrity.algorithm.parse()
    }

    /// True when the remote target is configured; required for shipping runs.
    pub fn has_remote(&self) -> bool {
        !self.server.remote.trim().is_empty()
    }
}

/// Pick the config path: explicit argument, executable-adjacent file,
/// then `/etc/rs-salvage.toml`.
pub fn find_config(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(anyhow!(
                "Specified config file does not exist: {}",
                path.display()
            ));
        }
        return Ok(path.to_path_buf());
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let adjacent = dir.join(CONFIG_FILE_NAME);
            if adjacent.exists() {
                return Ok(adjacent);
            }
        }
    }
    Ok(PathBuf::from("/etc").join(CONFIG_FILE_NAME))
}
