//! End-to-end run coordination.
//!
//! Activates layers, enumerates volumes, then drives a bounded worker pool
//! over the selected volumes in largest-first order. Each worker owns one
//! volume at a time and runs mount -> archive/chunk -> ship -> release as a
//! single synchronous flow; errors are captured into that volume's record and
//! never abort the run. Inspection always runs for real (it never mutates);
//! dry-run only affects commands that would change anything.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use crossbeam::channel::bounded;
use log::{info, warn};

use crate::archive::chunker::{run_chunker, ChunkerJob, Compressor};
use crate::archive::streamer::StreamOptions;
use crate::config::Config;
use crate::constants::{MANIFEST_NAME, MOUNT_BASE};
use crate::devices::discover::{
    assign_names, enumerate, gather_probes, print_plan, selected_largest_first, NameContext,
};
use crate::devices::{inspect, layers};
use crate::exec::{shutdown_requested, Executor};
use crate::models::{
    FailKind, Manifest, RecordStatus, RunRecord, RunTotals, SkipReason, Volume, VolumeRecord,
};
use crate::mount::mount_readonly;
use crate::shipper::{ShipError, Shipper};
use crate::utils::hash::HashAlgo;
use crate::utils::{ensure_dir, token, write_json_atomic};

/// CLI-driven run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub list_only: bool,
    pub dry_run: bool,
    pub workers_override: Option<usize>,
    pub only: Option<BTreeSet<String>>,
}

/// Worker count: explicit override, else `max(1, min(8, cpu/2))`.
pub fn auto_workers(explicit: usize) -> usize {
    if explicit > 0 {
        return explicit;
    }
    let cpu = num_cpus::get().max(1);
    (cpu / 2).clamp(1, 8)
}

/// Per-worker compression threads: `max(1, cpu / workers)`.
pub fn compressor_threads(workers: usize) -> usize {
    let cpu = num_cpus::get().max(1);
    (cpu / workers.max(1)).max(1)
}

struct WorkerContext {
    exec: Executor,
    config: Config,
    compressor: Compressor,
    threads: usize,
    algo: HashAlgo,
    date: String,
    token: String,
    shipper: Option<Shipper>,
}

/// Run the whole plan. Returns the process exit code; an `Err` is an
/// orchestrator-level failure (exit 2 territory).
pub fn run(config: &Config, opts: &RunOptions) -> Result<i32> {
    let exec = Executor::new(opts.dry_run);
    // inspection never mutates, so it always runs for real
    let probe_exec = Executor::new(false);

    crate::bundle::report_missing_tools();
    layers::assemble(&exec, &config.discovery);

    let topology = inspect::snapshot(&probe_exec)?;
    let boot = inspect::detect_boot_sources(&probe_exec, &topology);
    info!("Boot-exclusion set: {:?}", boot);
    let probes = gather_probes(&probe_exec, &topology);
    let mut volumes = enumerate(&topology, &probes, config, &boot, opts.only.as_ref());

    if opts.list_only {
        print_plan(&volumes);
        return Ok(0);
    }

    let started = Instant::now();
    let started_utc = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let date = Utc::now().format(&config.naming.date_fmt).to_string();
    let run_token = token::derive_token(
        &config.naming.token_source,
        &date,
        &config.archive.spool_dir,
    );
    assign_names(
        &mut volumes,
        &NameContext {
            pattern: &config.naming.pattern,
            date: &date,
            token: &run_token,
        },
    );

    let workers = auto_workers(opts.workers_override.unwrap_or(config.runtime.workers));
    let threads = compressor_threads(workers);
    info!("workers={workers} compressor_threads/worker={threads} date={date} token={run_token}");

    let mut records: Vec<VolumeRecord> = volumes
        .iter()
        .filter_map(|v| v.skip_reason().map(|reason| VolumeRecord::skipped(v, reason)))
        .collect();
    let queue = selected_largest_first(&volumes);

    if queue.is_empty() {
        info!("No volumes selected");
    } else if !opts.dry_run {
        ensure_dir(&config.archive.spool_dir)?;
        ensure_dir(Path::new(MOUNT_BASE))?;
    }

    match Compressor::resolve(&config.archive.compressor) {
        Ok(compressor) => {
            let shipper = if config.has_remote() {
                Some(Shipper::new(config, opts.dry_run)?)
            } else {
                None
            };
            let ctx = Arc::new(WorkerContext {
                exec: exec.clone(),
                config: config.clone(),
                compressor,
                threads,
                algo: config.hash_algo()?,
                date: date.clone(),
                token: run_token.clone(),
                shipper,
            });
            records.extend(run_pool(ctx, workers, queue)?);
        }
        Err(e) => {
            // every selected volume would fail identically; record it once each
            warn!("{e:#}");
            for volume in &queue {
                records.push(failed_record(volume, FailKind::Archive, &format!("{e:#}"), 0.0));
            }
        }
    }

    let mut run_record = RunRecord {
        host: token::run_hostname(),
        started_utc,
        duration_sec: started.elapsed().as_secs_f64(),
        date,
        token: run_token,
        workers,
        compressor_threads: threads,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        volumes: records,
        totals: RunTotals::default(),
    };
    run_record.tally();
    write_summaries(config, &run_record, opts.dry_run)?;

    if run_record.totals.failed > 0 {
        warn!(
            "{} volume(s) failed; see {}",
            run_record.totals.failed,
            config.output.run_summary_dir.display()
        );
        Ok(1)
    } else {
        info!(
            "Run complete: {} ok, {} skipped",
            run_record.totals.ok, run_record.totals.skipped
        );
        Ok(0)
    }
}

/// Dispatch selected volumes to a bounded pool, largest first, and collect
/// their records. Completion order is nondeterministic.
fn run_pool(
    ctx: Arc<WorkerContext>,
    workers: usize,
    queue: Vec<Volume>,
) -> Result<Vec<VolumeRecord>> {
    if queue.is_empty() {
        return Ok(Vec::new());
    }
    let capacity = queue.len();
    let (job_tx, job_rx) = bounded::<Volume>(capacity);
    let (result_tx, result_rx) = bounded::<VolumeRecord>(capacity);

    let mut handles = Vec::with_capacity(workers);
    for i in 0..workers {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let ctx = Arc::clone(&ctx);
        let handle = thread::Builder::new()
            .name(format!("salvage-worker-{i}"))
            .spawn(move || {
                while let Ok(volume) = job_rx.recv() {
                    let record = if shutdown_requested() {
                        VolumeRecord::skipped(&volume, &SkipReason::Cancelled)
                    } else {
                        process_volume(&ctx, &volume)
                    };
                    if result_tx.send(record).is_err() {
                        break;
                    }
                }
            })
            .context("Failed to spawn worker thread")?;
        handles.push(handle);
    }
    drop(job_rx);
    drop(result_tx);

    for volume in queue {
        if job_tx.send(volume).is_err() {
            break;
        }
    }
    drop(job_tx);

    let mut records = Vec::with_capacity(capacity);
    while let Ok(record) = result_rx.recv() {
        records.push(record);
    }
    for handle in handles {
        let _ = handle.join();
    }
    Ok(records)
}

fn failed_record(volume: &Volume, kind: FailKind, detail: &str, elapsed: f64) -> VolumeRecord {
    VolumeRecord {
        device: volume.device.clone(),
        fstype: volume.fstype.clone(),
        size_bytes: volume.size_bytes,
        name: volume.archive_base.clone(),
        status: RecordStatus::Failed,
        reason: Some(format!("{kind}: {detail}")),
        elapsed_sec: elapsed,
        bytes_in: 0,
        bytes_out: 0,
        chunks: 0,
    }
}

/// One volume, start to finish, inside a worker. Every error lands in the
/// record; the mount is released on all paths by the guard.
fn process_volume(ctx: &WorkerContext, volume: &Volume) -> VolumeRecord {
    let started = Instant::now();
    let name = match &volume.archive_base {
        Some(name) => name.clone(),
        None => {
            return failed_record(volume, FailKind::Archive, "volume has no archive name", 0.0)
        }
    };
    info!("Processing {} as {name}", volume.device);
    let spool_dir = ctx.config.archive.spool_dir.join(&name);
    let mountpoint = PathBuf::from(MOUNT_BASE).join(&name);

    let zfs_dataset = if volume.label.is_empty() {
        None
    } else {
        Some(volume.label.as_str())
    };
    let mut guard = match mount_readonly(&ctx.exec, volume, &mountpoint, zfs_dataset) {
        Ok(guard) => guard,
        Err(e) => {
            return failed_record(
                volume,
                FailKind::Mount,
                &e.to_string(),
                started.elapsed().as_secs_f64(),
            )
        }
    };

    let job = ChunkerJob {
        spool_dir: spool_dir.clone(),
        base_name: name.clone(),
        compressor: ctx.compressor,
        level: ctx.config.archive.compression_level,
        threads: ctx.threads,
        chunk_size_mb: ctx.config.archive.chunk_size_mb,
        algo: ctx.algo,
        stream: StreamOptions {
            max_file_size_mb: ctx.config.filters.max_file_size_mb,
            preserve_xattrs: ctx.config.archive.preserve_xattrs,
        },
    };
    let outcome = match run_chunker(&ctx.exec, guard.mountpoint(), &job) {
        Ok(outcome) => outcome,
        Err(e) => {
            guard.release();
            return failed_record(
                volume,
                FailKind::Archive,
                &format!("{e:#}"),
                started.elapsed().as_secs_f64(),
            );
        }
    };
    // the source is no longer needed once the stream is on the spool
    guard.release();

    let manifest = Manifest {
        archive: name.clone(),
        device: volume.device.clone(),
        fstype: volume.fstype.clone(),
        size_bytes: volume.size_bytes,
        compressor: ctx.compressor.binary().to_string(),
        compression_level: ctx.config.archive.compression_level,
        chunk_size_mb: ctx.config.archive.chunk_size_mb,
        hash_algorithm: ctx.algo.to_string(),
        chunks: outcome.chunks.clone(),
        whole_digest: outcome.whole_digest.clone(),
        created_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if !ctx.exec.dry_run() {
        if let Err(e) = write_json_atomic(&spool_dir.join(MANIFEST_NAME), &manifest) {
            return failed_record(
                volume,
                FailKind::Archive,
                &format!("{e:#}"),
                started.elapsed().as_secs_f64(),
            );
        }
    }

    let mut bytes_out = 0;
    if let Some(shipper) = &ctx.shipper {
        match shipper.ship_volume(&spool_dir, &ctx.date, &ctx.token, &manifest, ctx.algo) {
            Ok(shipped) => bytes_out = shipped.bytes_out,
            Err(e) => {
                let kind = match &e {
                    ShipError::Transport(_) => FailKind::Transport,
                    ShipError::Integrity { .. } => FailKind::Integrity,
                };
                return failed_record(
                    volume,
                    kind,
                    &e.to_string(),
                    started.elapsed().as_secs_f64(),
                );
            }
        }
    } else {
        info!("No remote configured; {name} kept in spool only");
    }

    VolumeRecord {
        device: volume.device.clone(),
        fstype: volume.fstype.clone(),
        size_bytes: volume.size_bytes,
        name: Some(name),
        status: RecordStatus::Ok,
        reason: None,
        elapsed_sec: started.elapsed().as_secs_f64(),
        bytes_in: outcome.tar.bytes_in,
        bytes_out,
        chunks: outcome.chunks.len() as u32,
    }
}

fn write_summaries(config: &Config, run_record: &RunRecord, dry_run: bool) -> Result<()> {
    if dry_run {
        info!(
            "[dry-run] run summary: {} ok, {} skipped, {} failed",
            run_record.totals.ok, run_record.totals.skipped, run_record.totals.failed
        );
        return Ok(());
    }
    let dir = &config.output.run_summary_dir;
    ensure_dir(dir)?;
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    write_json_atomic(&dir.join(format!("run-{stamp}.json")), run_record)?;
    if config.output.per_volume_json {
        for record in &run_record.volumes {
            if let Some(name) = &record.name {
                write_json_atomic(&dir.join(format!("{name}.json")), record)?;
            }
        }
    }
    Ok(())
}

/// Required-config gate for real runs; `--list` and `--dry-run` get by
/// without a remote.
pub fn validate_for_run(config: &Config, opts: &RunOptions) -> Result<()> {
    if !opts.list_only && !opts.dry_run && !config.has_remote() {
        return Err(anyhow!(
            "server.remote is not configured; refusing to run without an archival target"
        ));
    }
    Ok(())
}
