//! Read-only activation of composite storage layers before enumeration.
//!
//! Each layer is independently skippable and idempotent: rerunning against an
//! already-active layer is a no-op for the underlying tools. Failures are
//! warnings; the volumes behind a failed layer simply never appear. Nothing
//! here is dismantled on exit.

use log::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::exec::{have_binary, Executor};

/// Assemble md-RAID, activate LVM, and import ZFS pools, all read-only.
pub fn assemble(exec: &Executor, discovery: &DiscoveryConfig) {
    if discovery.allow_raid {
        assemble_raid(exec);
    } else {
        debug!("RAID assembly disabled by config");
    }
    if discovery.allow_lvm {
        activate_lvm(exec);
    } else {
        debug!("LVM activation disabled by config");
    }
    import_zfs(exec);
}

fn assemble_raid(exec: &Executor) {
    if !have_binary("mdadm") {
        debug!("mdadm not present; skipping RAID assembly");
        return;
    }
    // mdadm exits nonzero when no arrays were assembled; that is routine on
    // hosts without RAID and on reruns.
    match exec.run(&["mdadm", "--assemble", "--scan", "--readonly"]) {
        Ok(out) if out.success() => info!("md-RAID arrays assembled read-only"),
        Ok(out) => debug!(
            "mdadm assemble rc={}: {}",
            out.code,
            out.stderr.trim()
        ),
        Err(e) => warn!("md-RAID assembly failed: {e}"),
    }
}

fn activate_lvm(exec: &Executor) {
    if !have_binary("vgchange") {
        debug!("vgchange not present; skipping LVM activation");
        return;
    }
    if let Err(e) = exec.run(&["vgscan", "--quiet"]) {
        warn!("vgscan failed: {e}");
    }
    // --readonly makes activation itself metadata-safe and activates the
    // logical volumes read-only.
    match exec.run(&["vgchange", "-ay", "--readonly"]) {
        Ok(out) if out.success() => info!("LVM volume groups activated read-only"),
        Ok(out) => warn!("vgchange rc={}: {}", out.code, out.stderr.trim()),
        Err(e) => warn!("LVM activation failed: {e}"),
    }
}

fn import_zfs(exec: &Executor) {
    if !have_binary("zpool") {
        debug!("zpool not present; skipping ZFS import");
        return;
    }
    // -N avoids mounting datasets on import; mounts happen per volume later.
    match exec.run(&["zpool", "import", "-a", "-o", "readonly=on", "-N", "-f"]) {
        Ok(out) if out.success() => info!("ZFS pools imported readonly"),
        Ok(out) => debug!("zpool import rc={}: {}", out.code, out.stderr.trim()),
        Err(e) => warn!("ZFS pool import failed: {e}"),
    }
}
