//! Core data types shared across discovery, archiving and reporting.
//!
//! Volume dispositions are tagged variants rather than free strings so that
//! skip and failure reasons survive into the run summary unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a discovered volume was excluded from processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Device backs the running root mount or its whole-disk ancestor.
    Boot,
    /// Device name is on the configured avoid list.
    Avoided,
    /// Filesystem type is on the deny list.
    FstypeBlocked(String),
    /// Filesystem type is absent from the allow list (or not probed at all).
    FstypeUnsupported(String),
    /// At-rest encryption signature detected and `skip_if_encrypted` is set.
    Encrypted,
    /// Volume is below the configured minimum size.
    TooSmall { size_bytes: u64, min_gb: u64 },
    /// LVM or RAID origin while the corresponding layer is disallowed.
    LayerDisallowed(&'static str),
    /// Device not listed in the `--only` override.
    NotInOnly,
    /// Signature probing failed; the volume is not touched.
    InspectionFailed,
    /// Run was interrupted before this volume started.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Boot => write!(f, "boot"),
            SkipReason::Avoided => write!(f, "avoided"),
            SkipReason::FstypeBlocked(fs) => write!(f, "fstype_blocked:{fs}"),
            SkipReason::FstypeUnsupported(fs) if fs.is_empty() => {
                write!(f, "fstype_unsupported:none")
            }
            SkipReason::FstypeUnsupported(fs) => write!(f, "fstype_unsupported:{fs}"),
            SkipReason::Encrypted => write!(f, "encrypted"),
            SkipReason::TooSmall { min_gb, .. } => write!(f, "too_small<{min_gb}G"),
            SkipReason::LayerDisallowed(layer) => write!(f, "layer_disallowed:{layer}"),
            SkipReason::NotInOnly => write!(f, "not_in_only"),
            SkipReason::InspectionFailed => write!(f, "inspection_failed"),
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Which pipeline stage a volume failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    Mount,
    Archive,
    Transport,
    Integrity,
}

impl fmt::Display for FailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailKind::Mount => write!(f, "mount"),
            FailKind::Archive => write!(f, "archive"),
            FailKind::Transport => write!(f, "transport"),
            FailKind::Integrity => write!(f, "integrity"),
        }
    }
}

/// Discovery disposition of a volume before any work is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Selected,
    Skipped(SkipReason),
}

impl Selection {
    pub fn is_selected(&self) -> bool {
        matches!(self, Selection::Selected)
    }
}

/// A mountable volume produced by discovery.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Stable device path, e.g. `/dev/sdb1`.
    pub device: String,
    /// Kernel name, e.g. `sdb1`.
    pub kname: String,
    /// Declared filesystem type; empty when no signature was probed.
    pub fstype: String,
    /// Filesystem label; for ZFS members this is the pool name.
    pub label: String,
    pub size_bytes: u64,
    /// Ordinal of the backing disk in discovery order.
    pub disk_no: usize,
    /// Partition ordinal within the disk; 0 for whole-disk or layered volumes.
    pub part_no: usize,
    pub encrypted: bool,
    pub model: Option<String>,
    pub selection: Selection,
    /// Rendered archive base name; assigned to selected volumes only.
    pub archive_base: Option<String>,
}

impl Volume {
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.selection {
            Selection::Selected => None,
            Selection::Skipped(reason) => Some(reason),
        }
    }
}

/// Final status of a volume in the run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Ok,
    Skipped,
    Failed,
}

/// One committed chunk of a compressed archive stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub file_name: String,
    pub length: u64,
    pub digest: String,
}

/// Authoritative per-volume metadata, written last into the spool directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub archive: String,
    pub device: String,
    pub fstype: String,
    pub size_bytes: u64,
    pub compressor: String,
    pub compression_level: u32,
    pub chunk_size_mb: u64,
    pub hash_algorithm: String,
    pub chunks: Vec<ChunkRecord>,
    pub whole_digest: String,
    pub created_utc: String,
    pub tool_version: String,
}

/// Per-volume entry in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeRecord {
    pub device: String,
    pub fstype: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub elapsed_sec: f64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub chunks: u32,
}

impl VolumeRecord {
    /// Record for a volume that never entered the pipeline.
    pub fn skipped(volume: &Volume, reason: &SkipReason) -> Self {
        VolumeRecord {
            device: volume.device.clone(),
            fstype: volume.fstype.clone(),
            size_bytes: volume.size_bytes,
            name: volume.archive_base.clone(),
            status: RecordStatus::Skipped,
            reason: Some(reason.to_string()),
            elapsed_sec: 0.0,
            bytes_in: 0,
            bytes_out: 0,
            chunks: 0,
        }
    }
}

/// Aggregate counters across the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunTotals {
    pub ok: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub chunks: u64,
}

/// Whole-run summary written to the output directory.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub host: String,
    pub started_utc: String,
    pub duration_sec: f64,
    pub date: String,
    pub token: String,
    pub workers: usize,
    pub compressor_threads: usize,
    pub tool_version: String,
    pub volumes: Vec<VolumeRecord>,
    pub totals: RunTotals,
}

impl RunRecord {
    pub fn tally(&mut self) {
        let mut totals = RunTotals::default();
        for record in &self.volumes {
            match record.status {
                RecordStatus::Ok => totals.ok += 1,
                RecordStatus::Skipped => totals.skipped += 1,
                RecordStatus::Failed => totals.failed += 1,
            }
            totals.bytes_in += record.bytes_in;
            totals.bytes_out += record.bytes_out;
            totals.chunks += u64::from(record.chunks);
        }
        self.totals = totals;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_reasons_render_stable_strings() {
        assert_eq!(SkipReason::Boot.to_string(), "boot");
        assert_eq!(
            SkipReason::FstypeBlocked("swap".into()).to_string(),
            "fstype_blocked:swap"
        );
        assert_eq!(
            SkipReason::TooSmall { size_bytes: 1, min_gb: 256 }.to_string(),
            "too_small<256G"
        );
        assert_eq!(
            SkipReason::FstypeUnsupported(String::new()).to_string(),
            "fstype_unsupported:none"
        );
    }

    #[test]
    fn totals_accumulate_by_status() {
        let volume = Volume {
            device: "/dev/sdb1".into(),
            kname: "sdb1".into(),
            fstype: "ext4".into(),
            label: String::new(),
            size_bytes: 42,
            disk_no: 1,
            part_no: 1,
            encrypted: false,
            model: None,
            selection: Selection::Skipped(SkipReason::Encrypted),
            archive_base: None,
        };
        let mut run = RunRecord {
            host: "host".into(),
            started_utc: String::new(),
            duration_sec: 0.0,
            date: "20260101".into(),
            token: "abc12".into(),
            workers: 2,
            compressor_threads: 4,
            tool_version: env!("CARGO_PKG_VERSION").into(),
            volumes: vec![
                VolumeRecord::skipped(&volume, &SkipReason::Encrypted),
                VolumeRecord {
                    device: "/dev/sdc1".into(),
                    fstype: "ext4".into(),
                    size_bytes: 7,
                    name: Some("a".into()),
                    status: RecordStatus::Ok,
                    reason: None,
                    elapsed_sec: 1.5,
                    bytes_in: 100,
                    bytes_out: 60,
                    chunks: 2,
                },
            ],
            totals: RunTotals::default(),
        };
        run.tally();
        assert_eq!(run.totals.ok, 1);
        assert_eq!(run.totals.skipped, 1);
        assert_eq!(run.totals.failed, 0);
        assert_eq!(run.totals.bytes_out, 60);
        assert_eq!(run.totals.chunks, 2);
    }
}
