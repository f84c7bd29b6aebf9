//! Integration tests for the discovery pipeline: topology parsing, the
//! filter chain, processing order, and naming.
//!
//! These drive the same pure functions the orchestrator uses, against a
//! fixture topology shaped like a typical rescue boot: a live USB holding
//! the root mount, one large data disk, one encrypted disk, one small disk.

use std::collections::{BTreeMap, BTreeSet};

use rs_salvage::config::Config;
use rs_salvage::devices::discover::{
    assign_names, enumerate, selected_largest_first, NameContext, ProbeOutcome,
};
use rs_salvage::devices::inspect::{parse_lsblk, Topology};
use rs_salvage::models::{Selection, SkipReason, Volume};

const FIXTURE: &str = r#"{
    "blockdevices": [
        {"name": "sda", "kname": "sda", "path": "/dev/sda", "type": "disk",
         "size": 32000000000,
         "children": [
            {"name": "sda1", "kname": "sda1", "path": "/dev/sda1", "type": "part",
             "size": 31000000000, "fstype": "ext4", "mountpoint": "/", "pkname": "sda"}
         ]},
        {"name": "sdb", "kname": "sdb", "path": "/dev/sdb", "type": "disk",
         "size": 536870912000,
         "children": [
            {"name": "sdb1", "kname": "sdb1", "path": "/dev/sdb1", "type": "part",
             "size": 536870912000, "fstype": "ext4", "pkname": "sdb"}
         ]},
        {"name": "sdc", "kname": "sdc", "path": "/dev/sdc", "type": "disk",
         "size": 536870912000,
         "children": [
            {"name": "sdc1", "kname": "sdc1", "path": "/dev/sdc1", "type": "part",
             "size": 536870912000, "fstype": "crypto_luks", "pkname": "sdc"}
         ]},
        {"name": "sdd", "kname": "sdd", "path": "/dev/sdd", "type": "disk",
         "size": 11000000000,
         "children": [
            {"name": "sdd1", "kname": "sdd1", "path": "/dev/sdd1", "type": "part",
             "size": 10737418240, "fstype": "ext4", "pkname": "sdd"}
         ]}
    ]}"#;

fn topology() -> Topology {
    parse_lsblk(FIXTURE).unwrap()
}

fn boot_set() -> BTreeSet<String> {
    ["/dev/sda", "/dev/sda1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn empty_probes(topology: &Topology) -> BTreeMap<String, ProbeOutcome> {
    topology
        .devices
        .iter()
        .map(|d| (d.path.clone(), ProbeOutcome::Info(BTreeMap::new())))
        .collect()
}

fn find<'a>(volumes: &'a [Volume], device: &str) -> &'a Volume {
    volumes
        .iter()
        .find(|v| v.device == device)
        .unwrap_or_else(|| panic!("{device} missing from enumeration"))
}

/// The default-config scenario: boot media excluded, the big data disk
/// selected, the LUKS disk skipped without ever being mountable.
#[test]
fn default_config_selects_only_the_data_disk() {
    let topology = topology();
    let config = Config::default();
    let volumes = enumerate(
        &topology,
        &empty_probes(&topology),
        &config,
        &boot_set(),
        None,
    );

    assert!(matches!(
        find(&volumes, "/dev/sda1").selection,
        Selection::Skipped(SkipReason::Boot)
    ));
    assert!(find(&volumes, "/dev/sdb1").selection.is_selected());
    // the LUKS volume never reaches selection, whether via the fstype deny
    // list or the encryption probe
    assert!(!find(&volumes, "/dev/sdc1").selection.is_selected());
    assert!(matches!(
        find(&volumes, "/dev/sdd1").selection,
        Selection::Skipped(SkipReason::TooSmall { .. })
    ));

    let queue = selected_largest_first(&volumes);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].device, "/dev/sdb1");
}

/// Enumeration is a pure function: identical inputs, identical output order.
#[test]
fn enumeration_is_stable_across_runs() {
    let topology = topology();
    let config = Config::default();
    let probes = empty_probes(&topology);

    let runs: Vec<Vec<(String, bool)>> = (0..3)
        .map(|_| {
            enumerate(&topology, &probes, &config, &boot_set(), None)
                .into_iter()
                .map(|v| (v.device.clone(), v.selection.is_selected()))
                .collect()
        })
        .collect();
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[1], runs[2]);
}

/// A too-small volume is skipped before any mount could happen, and the
/// plan still lists both entries.
#[test]
fn small_volumes_are_listed_but_skipped() {
    let topology = topology();
    let mut config = Config::default();
    config.discovery.min_partition_size_gb = 256;
    let volumes = enumerate(
        &topology,
        &empty_probes(&topology),
        &config,
        &boot_set(),
        None,
    );

    let sdb1 = find(&volumes, "/dev/sdb1");
    let sdd1 = find(&volumes, "/dev/sdd1");
    assert!(sdb1.selection.is_selected());
    assert_eq!(
        sdd1.skip_reason().map(ToString::to_string),
        Some("too_small<256G".to_string())
    );
}

/// Archive names are pairwise distinct within a run even when the pattern
/// collapses distinct volumes onto the same rendering.
#[test]
fn naming_is_unique_under_degenerate_patterns() {
    let topology = topology();
    let mut config = Config::default();
    config.discovery.min_partition_size_gb = 1;
    config.discovery.skip_fstypes.clear();
    let mut volumes = enumerate(
        &topology,
        &empty_probes(&topology),
        &config,
        &BTreeSet::new(),
        None,
    );
    assign_names(
        &mut volumes,
        &NameContext {
            pattern: "archive",
            date: "20260101",
            token: "ab12z",
        },
    );

    let names: Vec<String> = volumes
        .iter()
        .filter_map(|v| v.archive_base.clone())
        .collect();
    assert!(!names.is_empty());
    let unique: BTreeSet<&String> = names.iter().collect();
    assert_eq!(unique.len(), names.len(), "names collide: {names:?}");
}

/// `--only` narrows the run without disturbing earlier skip reasons.
#[test]
fn only_override_narrows_selection() {
    let topology = topology();
    let mut config = Config::default();
    config.discovery.min_partition_size_gb = 1;
    let only: BTreeSet<String> = ["/dev/sdd1".to_string()].into_iter().collect();
    let volumes = enumerate(
        &topology,
        &empty_probes(&topology),
        &config,
        &boot_set(),
        Some(&only),
    );

    assert!(find(&volumes, "/dev/sdd1").selection.is_selected());
    assert!(matches!(
        find(&volumes, "/dev/sdb1").selection,
        Selection::Skipped(SkipReason::NotInOnly)
    ));
    assert!(matches!(
        find(&volumes, "/dev/sda1").selection,
        Selection::Skipped(SkipReason::Boot)
    ));
}
