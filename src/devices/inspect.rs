//! Block-device topology and signature probing.
//!
//! Everything here is read-only: `lsblk` for the device tree, `blkid` for
//! filesystem and encryption signatures, `findmnt` for the boot-exclusion
//! set. Probe failures are advisory; the affected volume is skipped rather
//! than touched.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Deserializer};

use crate::exec::Executor;

const LSBLK_COLUMNS: &str = "NAME,KNAME,PATH,TYPE,SIZE,FSTYPE,LABEL,UUID,MOUNTPOINT,PKNAME,MODEL";

/// Mountpoints whose backing devices belong to the live/rescue media.
const BOOT_MOUNTPOINTS: &[&str] = &["/", "/cdrom", "/isodevice"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Disk,
    Partition,
    Lvm,
    Raid,
    Crypt,
    Rom,
    Loop,
    Other,
}

impl DeviceKind {
    fn from_lsblk(kind: &str) -> Self {
        match kind {
            "disk" => DeviceKind::Disk,
            "part" => DeviceKind::Partition,
            "lvm" => DeviceKind::Lvm,
            "crypt" => DeviceKind::Crypt,
            "rom" => DeviceKind::Rom,
            "loop" => DeviceKind::Loop,
            k if k.starts_with("raid") => DeviceKind::Raid,
            _ => DeviceKind::Other,
        }
    }
}

/// One node of the block-device tree, flattened.
#[derive(Debug, Clone)]
pub struct Device {
    pub path: String,
    pub kname: String,
    pub kind: DeviceKind,
    pub fstype: String,
    pub size_bytes: u64,
    pub label: String,
    pub uuid: Option<String>,
    pub mountpoint: Option<String>,
    /// Path of the parent device, if any (child -> parent, a DAG).
    pub parent: Option<String>,
    pub model: Option<String>,
}

/// Snapshot of the block-device tree at discovery time.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub devices: Vec<Device>,
}

impl Topology {
    pub fn get(&self, path: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.path == path)
    }

    /// Walk parent links up to the whole-disk ancestor. A disk is its own
    /// ancestor; the walk is bounded because the topology is a DAG.
    pub fn whole_disk_of(&self, path: &str) -> Option<&Device> {
        let mut current = self.get(path)?;
        let mut hops = 0;
        while current.kind != DeviceKind::Disk {
            let parent = current.parent.as_deref()?;
            current = self.get(parent)?;
            hops += 1;
            if hops > 16 {
                return None;
            }
        }
        Some(current)
    }

    /// Disk ordinals in stable (sorted-path) order.
    pub fn disk_index(&self) -> BTreeMap<String, usize> {
        let mut disks: Vec<&str> = self
            .devices
            .iter()
            .filter(|d| d.kind == DeviceKind::Disk)
            .map(|d| d.path.as_str())
            .collect();
        disks.sort_unstable();
        disks
            .into_iter()
            .enumerate()
            .map(|(i, p)| (p.to_string(), i))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct LsblkReport {
    #[serde(default)]
    blockdevices: Vec<LsblkNode>,
}

#[derive(Debug, Deserialize)]
struct LsblkNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    kname: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    size: Option<u64>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    pkname: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    children: Vec<LsblkNode>,
}

/// Older util-linux emits every JSON value as a string; accept both forms.
fn lenient_u64<'de, D>(de: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(de)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Query the full device tree.
pub fn snapshot(exec: &Executor) -> Result<Topology> {
    let output = exec
        .run_checked(&["lsblk", "-b", "-J", "-o", LSBLK_COLUMNS])
        .context("lsblk failed; block-device discovery requires root")?;
    parse_lsblk(&output.stdout)
}

/// Parse `lsblk -b -J` output into a flattened topology.
pub fn parse_lsblk(json: &str) -> Result<Topology> {
    let report: LsblkReport =
        serde_json::from_str(json).context("lsblk output is not valid JSON")?;
    let mut topology = Topology::default();
    for node in &report.blockdevices {
        flatten(node, None, &mut topology.devices);
    }
    Ok(topology)
}

fn flatten(node: &LsblkNode, parent: Option<&str>, out: &mut Vec<Device>) {
    let kname = node
        .kname
        .clone()
        .or_else(|| node.name.clone())
        .unwrap_or_default();
    let path = node
        .path
        .clone()
        .unwrap_or_else(|| format!("/dev/{kname}"));
    let device = Device {
        path: path.clone(),
        kname,
        kind: DeviceKind::from_lsblk(node.kind.as_deref().unwrap_or("")),
        fstype: node.fstype.clone().unwrap_or_default().to_lowercase(),
        size_bytes: node.size.unwrap_or(0),
        label: node.label.clone().unwrap_or_default(),
        uuid: node.uuid.clone(),
        mountpoint: node.mountpoint.clone().filter(|m| !m.is_empty()),
        parent: parent
            .map(str::to_string)
            .or_else(|| node.pkname.clone().filter(|p| !p.is_empty()).map(|p| format!("/dev/{p}"))),
        model: node
            .model
            .clone()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty()),
    };
    out.push(device);
    for child in &node.children {
        flatten(child, Some(&path), out);
    }
}

/// At-rest encryption families this tool recognizes and refuses to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionKind {
    Luks,
    Bitlocker,
    ApfsEncrypted,
    Filevault,
    Veracrypt,
    DmCrypt,
}

impl fmt::Display for EncryptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncryptionKind::Luks => "LUKS",
            EncryptionKind::Bitlocker => "BitLocker",
            EncryptionKind::ApfsEncrypted => "APFS-encrypted",
            EncryptionKind::Filevault => "FileVault",
            EncryptionKind::Veracrypt => "VeraCrypt",
            EncryptionKind::DmCrypt => "dm-crypt",
        };
        f.write_str(name)
    }
}

/// Parse `blkid -o export` key=value lines.
pub fn parse_blkid_export(output: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in output.lines() {
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

/// Run the signature probe for one device. `blkid` exits 2 when it finds no
/// signature; that is a valid empty result, not a failure.
pub fn probe_signature(exec: &Executor, path: &str) -> Result<BTreeMap<String, String>> {
    let output = exec.run(&["blkid", "-o", "export", path])?;
    if output.success() {
        Ok(parse_blkid_export(&output.stdout))
    } else if output.code == 2 {
        Ok(BTreeMap::new())
    } else {
        Err(anyhow::anyhow!(
            "blkid probe of {path} failed (rc={}): {}",
            output.code,
            output.stderr.trim()
        ))
    }
}

/// Declare a device encrypted when its kind is a crypto mapping, its fstype
/// is a crypto container, or the signature probe says so.
pub fn detect_encryption(
    kind: DeviceKind,
    fstype: &str,
    probe: &BTreeMap<String, String>,
) -> Option<EncryptionKind> {
    if kind == DeviceKind::Crypt {
        return Some(EncryptionKind::DmCrypt);
    }
    let fstype = fstype.to_ascii_lowercase();
    if fstype == "crypto_luks" {
        return Some(EncryptionKind::Luks);
    }
    if fstype == "bitlocker" {
        return Some(EncryptionKind::Bitlocker);
    }

    let probe_type = probe
        .get("TYPE")
        .map(|t| t.to_ascii_lowercase())
        .unwrap_or_default();
    let label = probe
        .get("LABEL")
        .map(|l| l.to_ascii_lowercase())
        .unwrap_or_default();

    if probe_type.contains("crypto_luks") {
        return Some(EncryptionKind::Luks);
    }
    if probe_type.contains("bitlocker") || label.contains("bitlocker") || label.contains("fve") {
        return Some(EncryptionKind::Bitlocker);
    }
    if probe_type == "apfs" {
        let features = probe
            .get("APFS_FEATURES")
            .map(|f| f.to_ascii_lowercase())
            .unwrap_or_default();
        if features.contains("encrypted") {
            return Some(EncryptionKind::ApfsEncrypted);
        }
        if label.contains("filevault") {
            return Some(EncryptionKind::Filevault);
        }
    }
    if label.contains("veracrypt") || label.contains("truecrypt") {
        return Some(EncryptionKind::Veracrypt);
    }
    None
}

/// The device backing the running root mount plus its whole-disk ancestor,
/// and the same for the live-media mountpoints.
pub fn detect_boot_sources(exec: &Executor, topology: &Topology) -> BTreeSet<String> {
    let mut excluded = BTreeSet::new();
    for mountpoint in BOOT_MOUNTPOINTS {
        let output = match exec.run(&["findmnt", "-no", "SOURCE", mountpoint]) {
            Ok(out) if out.success() => out,
            Ok(_) => continue,
            Err(e) => {
                warn!("findmnt {mountpoint} failed: {e}");
                continue;
            }
        };
        let source = output.stdout.trim().to_string();
        if !source.starts_with("/dev/") {
            continue;
        }
        debug!("Boot-exclusion source for {mountpoint}: {source}");
        if let Some(disk) = topology.whole_disk_of(&source) {
            excluded.insert(disk.path.clone());
        }
        excluded.insert(source);
    }
    excluded
}
