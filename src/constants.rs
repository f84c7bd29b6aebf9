//! Global constants for the rs-salvage application.
//!
//! This module centralizes tuning values and fixed names so the rest of the
//! code never carries magic numbers.

// Buffer sizes
/// Read buffer for the compressed stream between compressor and splitter (256KB)
pub const STREAM_BUFFER_SIZE: usize = 256 * 1024;

/// Buffer for SFTP transfers (1MB)
pub const SHIP_BUFFER_SIZE: usize = 1024 * 1024;

/// Upper bound on captured stdout/stderr per child process (1MB)
pub const MAX_CAPTURED_OUTPUT: usize = 1024 * 1024;

// Child process supervision
/// Poll interval while waiting on a child process
pub const CHILD_POLL_INTERVAL_MS: u64 = 50;

/// Grace period between SIGTERM and SIGKILL for helper processes
pub const CHILD_TERM_GRACE_SECS: u64 = 5;

// Remote transfer tuning
/// Maximum transport retry attempts per operation
pub const SHIP_MAX_RETRIES: usize = 3;

/// Base retry delay in milliseconds
pub const SHIP_RETRY_BASE_DELAY_MS: u64 = 250;

/// Maximum retry delay in seconds
pub const SHIP_RETRY_MAX_DELAY_SECS: u64 = 30;

/// SSH connection timeout in seconds
pub const SSH_CONNECT_TIMEOUT_SECS: u64 = 30;

// On-disk layout
/// Root under which scratch mountpoints are created
pub const MOUNT_BASE: &str = "/mnt/rs-salvage";

/// Sidecar listing part filenames in order
pub const PARTS_LIST_NAME: &str = ".parts";

/// Per-volume manifest filename
pub const MANIFEST_NAME: &str = ".manifest.json";

/// File in the spool root holding the fallback host token
pub const TOKEN_FILE_NAME: &str = ".host-token";

/// Minimum zero-padded width of chunk ordinals
pub const PART_ORDINAL_WIDTH: usize = 4;

// Defaults mirrored by the config loader
/// Filename probed next to the executable and under /etc
pub const CONFIG_FILE_NAME: &str = "rs-salvage.toml";

/// Log file written into the run summary directory
pub const LOG_FILE_NAME: &str = "rs-salvage.log";

/// Helper binaries worth reporting about at startup
pub const OPTIONAL_TOOLS: &[(&str, &str)] = &[
    ("mdadm", "md-RAID assembly"),
    ("vgchange", "LVM activation"),
    ("zpool", "ZFS pool import"),
    ("ntfs-3g", "NTFS mounts"),
    ("apfs-fuse", "APFS mounts"),
];
