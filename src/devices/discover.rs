//! Volume enumeration: turn a topology snapshot into an ordered list of
//! candidate volumes, each selected or annotated with a skip reason.
//!
//! Enumeration is a pure function of topology + probes + config + overrides,
//! so two runs over identical inputs produce identical volume lists in
//! identical order.

use std::collections::{BTreeMap, BTreeSet};

use log::warn;

use crate::config::Config;
use crate::devices::inspect::{
    detect_encryption, probe_signature, DeviceKind, Topology,
};
use crate::exec::Executor;
use crate::models::{Selection, SkipReason, Volume};

/// Result of the signature probe for one candidate device.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Info(BTreeMap<String, String>),
    Failed,
}

/// Naming inputs fixed for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct NameContext<'a> {
    pub pattern: &'a str,
    pub date: &'a str,
    pub token: &'a str,
}

fn is_candidate(kind: DeviceKind, fstype: &str) -> bool {
    match kind {
        DeviceKind::Partition
        | DeviceKind::Lvm
        | DeviceKind::Raid
        | DeviceKind::Crypt
        | DeviceKind::Rom => true,
        DeviceKind::Disk => !fstype.is_empty(),
        DeviceKind::Loop | DeviceKind::Other => false,
    }
}

/// Trailing decimal ordinal of a kernel name: `sda12` -> 12, `nvme0n1p2` -> 2.
fn partition_ordinal(kname: &str) -> usize {
    let digits: String = kname
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(0)
}

/// Run the signature probe for every candidate device.
pub fn gather_probes(exec: &Executor, topology: &Topology) -> BTreeMap<String, ProbeOutcome> {
    let mut probes = BTreeMap::new();
    for device in &topology.devices {
        if !is_candidate(device.kind, &device.fstype) {
            continue;
        }
        let outcome = match probe_signature(exec, &device.path) {
            Ok(info) => ProbeOutcome::Info(info),
            Err(e) => {
                warn!("Signature probe failed for {}: {e}", device.path);
                ProbeOutcome::Failed
            }
        };
        probes.insert(device.path.clone(), outcome);
    }
    probes
}

/// ZFS pools with a member on a boot-adjacent disk are refused wholesale;
/// importing them read-only still ties the run to the live media.
fn boot_tainted_pools(topology: &Topology, boot: &BTreeSet<String>) -> BTreeSet<String> {
    let mut pools = BTreeSet::new();
    for device in &topology.devices {
        if device.fstype != "zfs_member" || device.label.is_empty() {
            continue;
        }
        let disk_in_boot = topology
            .whole_disk_of(&device.path)
            .map(|disk| boot.contains(&disk.path))
            .unwrap_or(false);
        if disk_in_boot || boot.contains(&device.path) {
            pools.insert(device.label.clone());
        }
    }
    pools
}

/// Apply the filter chain in its fixed order and return every candidate with
/// its disposition. Order of the result is discovery order.
pub fn enumerate(
    topology: &Topology,
    probes: &BTreeMap<String, ProbeOutcome>,
    config: &Config,
    boot: &BTreeSet<String>,
    only: Option<&BTreeSet<String>>,
) -> Vec<Volume> {
    let discovery = &config.discovery;
    let disk_index = topology.disk_index();
    let tainted_pools = boot_tainted_pools(topology, boot);
    let min_bytes = discovery.min_partition_size_gb * 1024 * 1024 * 1024;
    let mut volumes = Vec::new();

    for device in &topology.devices {
        if !is_candidate(device.kind, &device.fstype) {
            continue;
        }

        let whole_disk = topology.whole_disk_of(&device.path);
        let disk_no = whole_disk
            .and_then(|disk| disk_index.get(&disk.path).copied())
            .unwrap_or(0);
        let part_no = match device.kind {
            DeviceKind::Partition => partition_ordinal(&device.kname),
            _ => 0,
        };

        let probe = probes.get(&device.path);
        let encrypted = match probe {
            Some(ProbeOutcome::Info(info)) => {
                detect_encryption(device.kind, &device.fstype, info).is_some()
            }
            _ => detect_encryption(device.kind, &device.fstype, &BTreeMap::new()).is_some(),
        };

        let in_boot_set = boot.contains(&device.path)
            || whole_disk.map(|d| boot.contains(&d.path)).unwrap_or(false);
        let avoided = discovery.avoid_devices.iter().any(|name| {
            name == &device.kname
                || whole_disk.map(|d| &d.kname == name).unwrap_or(false)
        });
        let explicitly_listed = only.map(|set| set.contains(&device.path)).unwrap_or(false);
        let pool_tainted = device.fstype == "zfs_member"
            && tainted_pools.contains(&device.label)
            && !explicitly_listed;

        let reason = if in_boot_set || pool_tainted {
            Some(SkipReason::Boot)
        } else if avoided {
            Some(SkipReason::Avoided)
        } else if discovery.skip_fstypes.iter().any(|fs| fs.eq_ignore_ascii_case(&device.fstype)) {
            Some(SkipReason::FstypeBlocked(device.fstype.clone()))
        } else if !discovery.include_fstypes.is_empty()
            && device.kind == DeviceKind::Partition
            && !discovery
                .include_fstypes
                .iter()
                .any(|fs| fs.eq_ignore_ascii_case(&device.fstype))
        {
            Some(SkipReason::FstypeUnsupported(device.fstype.clone()))
        } else if device.kind == DeviceKind::Partition && device.fstype.is_empty() {
            // Nothing probed means nothing mountable.
            Some(SkipReason::FstypeUnsupported(String::new()))
        } else if discovery.skip_if_encrypted && matches!(probe, Some(ProbeOutcome::Failed)) {
            Some(SkipReason::InspectionFailed)
        } else if discovery.skip_if_encrypted && encrypted {
            Some(SkipReason::Encrypted)
        } else if device.size_bytes < min_bytes {
            Some(SkipReason::TooSmall {
                size_bytes: device.size_bytes,
                min_gb: discovery.min_partition_size_gb,
            })
        } else if device.kind == DeviceKind::Lvm && !discovery.allow_lvm {
            Some(SkipReason::LayerDisallowed("lvm"))
        } else if device.kind == DeviceKind::Raid && !discovery.allow_raid {
            Some(SkipReason::LayerDisallowed("raid"))
        } else {
            None
        };

        let reason = match (reason, only) {
            (Some(reason), _) => Some(reason),
            (None, Some(set)) if !set.contains(&device.path) => Some(SkipReason::NotInOnly),
            (None, _) => None,
        };

        volumes.push(Volume {
            device: device.path.clone(),
            kname: device.kname.clone(),
            fstype: device.fstype.clone(),
            label: device.label.clone(),
            size_bytes: device.size_bytes,
            disk_no,
            part_no,
            encrypted,
            model: device.model.clone(),
            selection: match reason {
                Some(reason) => Selection::Skipped(reason),
                None => Selection::Selected,
            },
            archive_base: None,
        });
    }
    volumes
}

/// Render archive base names for selected volumes. Collisions get an ordinal
/// suffix so names stay pairwise distinct within the run.
pub fn assign_names(volumes: &mut [Volume], ctx: &NameContext) {
    let mut taken: BTreeSet<String> = BTreeSet::new();
    for volume in volumes.iter_mut() {
        if !volume.selection.is_selected() {
            continue;
        }
        let base = render_pattern(ctx, volume.disk_no, volume.part_no);
        let mut name = base.clone();
        let mut ordinal = 2;
        while !taken.insert(name.clone()) {
            name = format!("{base}_{ordinal}");
            ordinal += 1;
        }
        volume.archive_base = Some(name);
    }
}

fn render_pattern(ctx: &NameContext, disk: usize, part: usize) -> String {
    ctx.pattern
        .replace("{date}", ctx.date)
        .replace("{token}", ctx.token)
        .replace("{disk}", &disk.to_string())
        .replace("{part}", &part.to_string())
}

/// Selected volumes in dispatch order: size descending, stable tie-break on
/// device path.
pub fn selected_largest_first(volumes: &[Volume]) -> Vec<Volume> {
    let mut selected: Vec<Volume> = volumes
        .iter()
        .filter(|v| v.selection.is_selected())
        .cloned()
        .collect();
    selected.sort_by(|a, b| {
        b.size_bytes
            .cmp(&a.size_bytes)
            .then_with(|| a.device.cmp(&b.device))
    });
    selected
}

/// Human-readable plan for `--list`.
pub fn print_plan(volumes: &[Volume]) {
    println!(
        "{:<20} {:<12} {:>9} {:>4} {:>4} {:<24}",
        "DEVICE", "FS", "SIZE(GB)", "DISK", "PART", "STATUS"
    );
    let mut ordered: Vec<&Volume> = volumes.iter().collect();
    ordered.sort_by(|a, b| {
        (a.disk_no, a.part_no, &a.device).cmp(&(b.disk_no, b.part_no, &b.device))
    });
    for volume in ordered {
        let status = match &volume.selection {
            Selection::Selected => "selected".to_string(),
            Selection::Skipped(reason) => format!("skipped:{reason}"),
        };
        let fstype = if volume.fstype.is_empty() { "-" } else { &volume.fstype };
        println!(
            "{:<20} {:<12} {:>9.1} {:>4} {:>4} {:<24}",
            volume.device,
            fstype,
            crate::utils::gib(volume.size_bytes),
            volume.disk_no,
            volume.part_no,
            status
        );
    }
}
