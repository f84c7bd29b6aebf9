//! The streaming pipeline: tar producer -> external compressor -> hash tap ->
//! splitter.
//!
//! The tar stream feeds the compressor's stdin from a dedicated thread; the
//! compressed stream is read back here, hashed twice (whole-stream and
//! per-chunk), and cut into fixed-size parts. Stages are connected by OS
//! pipes, so a slow disk blocks the compressor which blocks the tar producer.
//!
//! A chunk is committed only after its bytes are fsync'd and its digest
//! sidecar is on disk. Committed chunks from an interrupted run are reused on
//! rerun when the recompressed stream reproduces their digest; the first
//! mismatch invalidates that chunk and everything after it. Metadata
//! (`.parts`, the whole-stream digest, the manifest) is written only once the
//! producer and compressor have finished cleanly.

use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};

use crate::constants::{PARTS_LIST_NAME, PART_ORDINAL_WIDTH, STREAM_BUFFER_SIZE};
use crate::exec::{have_binary, shutdown_requested, terminate_child, Executor};
use crate::models::ChunkRecord;
use crate::utils::ensure_dir;
use crate::utils::hash::{HashAlgo, HashStream};

use super::streamer::{stream_tar, StreamOptions, TarStats};

/// External compressor driving the stream. zstd is preferred; pigz is the
/// fallback when zstd is not installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    Zstd,
    Pigz,
}

impl Compressor {
    /// Resolve the configured compressor against what is actually on PATH.
    pub fn resolve(requested: &str) -> Result<Compressor> {
        let preference: &[Compressor] = match requested {
            "pigz" => &[Compressor::Pigz, Compressor::Zstd],
            _ => &[Compressor::Zstd, Compressor::Pigz],
        };
        for candidate in preference {
            if have_binary(candidate.binary()) {
                if candidate.binary() != requested {
                    warn!(
                        "Compressor {requested} not found; falling back to {}",
                        candidate.binary()
                    );
                }
                return Ok(*candidate);
            }
        }
        Err(anyhow!(
            "no compressor available: neither zstd nor pigz is on PATH"
        ))
    }

    pub fn binary(&self) -> &'static str {
        match self {
            Compressor::Zstd => "zstd",
            Compressor::Pigz => "pigz",
        }
    }

    /// Part filename extension: `zst` or `gz`.
    pub fn extension(&self) -> &'static str {
        match self {
            Compressor::Zstd => "zst",
            Compressor::Pigz => "gz",
        }
    }

    fn argv(&self, level: u32, threads: usize) -> Vec<String> {
        match self {
            Compressor::Zstd => vec![
                "zstd".into(),
                "-q".into(),
                format!("-T{threads}"),
                format!("-{level}"),
                "-c".into(),
            ],
            Compressor::Pigz => vec![
                "pigz".into(),
                "-p".into(),
                threads.to_string(),
                format!("-{level}"),
                "-c".into(),
            ],
        }
    }
}

/// Everything fixed about one volume's chunking job.
#[derive(Debug, Clone)]
pub struct ChunkerJob {
    pub spool_dir: PathBuf,
    pub base_name: String,
    pub compressor: Compressor,
    pub level: u32,
    pub threads: usize,
    pub chunk_size_mb: u64,
    pub algo: HashAlgo,
    pub stream: StreamOptions,
}

#[derive(Debug)]
pub struct ChunkOutcome {
    pub chunks: Vec<ChunkRecord>,
    pub whole_digest: String,
    /// Total compressed bytes across all parts.
    pub bytes_out: u64,
    /// Parts carried over unchanged from an interrupted run.
    pub reused: usize,
    pub tar: TarStats,
}

/// Drive the full pipeline for one mounted volume.
pub fn run_chunker(exec: &Executor, mount_root: &Path, job: &ChunkerJob) -> Result<ChunkOutcome> {
    let argv = job.compressor.argv(job.level, job.threads);

    if exec.dry_run() {
        info!(
            "[dry-run] tar stream of {} | {} | split into {} MiB parts under {}",
            mount_root.display(),
            argv.join(" "),
            job.chunk_size_mb,
            job.spool_dir.display()
        );
        return Ok(ChunkOutcome {
            chunks: Vec::new(),
            whole_digest: String::new(),
            bytes_out: 0,
            reused: 0,
            tar: TarStats::default(),
        });
    }

    ensure_dir(&job.spool_dir)?;
    let argv_refs: Vec<&str> = argv.iter().map(String::as_str).collect();
    let mut child = exec.spawn_streaming(&argv_refs)?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("compressor has no stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("compressor has no stdout"))?;
    let stderr_handle = crate::exec::drain_bounded(child.stderr.take());

    let stream_opts = job.stream;
    let root = mount_root.to_path_buf();
    let tar_thread = thread::Builder::new()
        .name("tar-stream".to_string())
        .spawn(move || -> Result<TarStats> {
            let mut writer = BufWriter::new(stdin);
            let stats = stream_tar(&root, &stream_opts, &mut writer)?;
            writer.flush().context("Failed to flush tar stream")?;
            Ok(stats)
        })
        .context("Failed to spawn tar producer thread")?;

    let params = SplitParams {
        spool_dir: job.spool_dir.clone(),
        base_name: job.base_name.clone(),
        ext: job.compressor.extension(),
        chunk_bytes: job.chunk_size_mb * 1024 * 1024,
        algo: job.algo,
    };
    let pending = split_collect(stdout, &params);

    // Reap the producer side before judging the split result; a split error
    // must kill the compressor or the tar thread would block forever.
    if pending.is_err() || shutdown_requested() {
        terminate_child(&mut child);
    }
    let status = child.wait().context("Failed to wait for compressor")?;
    let tar_result = tar_thread
        .join()
        .map_err(|_| anyhow!("tar producer thread panicked"))?;
    let stderr = stderr_handle.join().unwrap_or_default();

    let pending = match pending {
        Ok(pending) => pending,
        Err(e) => return Err(e.context("splitter failed")),
    };
    if shutdown_requested() {
        discard_pending(pending);
        return Err(anyhow!("interrupted; partial chunk discarded"));
    }
    if !status.success() {
        discard_pending(pending);
        return Err(anyhow!(
            "{} exited {}: {}",
            job.compressor.binary(),
            status.code().unwrap_or(-1),
            stderr.trim()
        ));
    }
    let tar_stats = match tar_result {
        Ok(stats) => stats,
        Err(e) => {
            discard_pending(pending);
            return Err(e.context("tar stream failed"));
        }
    };

    let result = finalize_split(pending, &params)?;
    info!(
        "Chunked {} into {} part(s), {} reused, {} compressed bytes",
        job.base_name,
        result.chunks.len(),
        result.reused,
        result.bytes_out
    );
    Ok(ChunkOutcome {
        chunks: result.chunks,
        whole_digest: result.whole_digest,
        bytes_out: result.bytes_out,
        reused: result.reused,
        tar: tar_stats,
    })
}

// --- splitter ---------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct SplitParams {
    pub spool_dir: PathBuf,
    pub base_name: String,
    pub ext: &'static str,
    /// 0 means a single unbounded part.
    pub chunk_bytes: u64,
    pub algo: HashAlgo,
}

impl SplitParams {
    fn part_name(&self, ordinal: u64) -> String {
        format!(
            "{}.tar.{}.part{:0width$}",
            self.base_name,
            self.ext,
            ordinal,
            width = PART_ORDINAL_WIDTH
        )
    }

    fn part_prefix(&self) -> String {
        format!("{}.tar.{}.part", self.base_name, self.ext)
    }

    fn sidecar_name(&self, part_name: &str) -> String {
        format!("{part_name}.{}", self.algo.extension())
    }

    fn whole_name(&self) -> String {
        format!(".whole.{}", self.algo.extension())
    }
}

pub(crate) struct SplitResult {
    pub chunks: Vec<ChunkRecord>,
    pub whole_digest: String,
    pub bytes_out: u64,
    pub reused: usize,
}

pub(crate) struct SplitPending {
    chunks: Vec<ChunkRecord>,
    whole: HashStream,
    writer: Option<PartWriter>,
    bytes_out: u64,
    reused: usize,
}

/// Consume the compressed stream, committing full-size parts as boundaries
/// pass. The final, possibly short part stays uncommitted in the returned
/// state until [`finalize_split`] confirms the stream really ended.
pub(crate) fn split_collect<R: Read>(mut input: R, params: &SplitParams) -> Result<SplitPending> {
    clean_stale_tmp(params)?;
    let committed = scan_committed(params)?;
    if !committed.is_empty() {
        info!(
            "Found {} committed part(s) for {}; verifying while streaming",
            committed.len(),
            params.base_name
        );
    }

    let mut state = SplitPending {
        chunks: Vec::new(),
        whole: params.algo.hasher(),
        writer: None,
        bytes_out: 0,
        reused: 0,
    };
    let mut reuse_valid = true;

    let open_writer = |ordinal: u64, reuse_valid: bool| -> Result<PartWriter> {
        let reuse = if reuse_valid {
            committed.get(ordinal as usize - 1).cloned()
        } else {
            None
        };
        PartWriter::open(params, ordinal, reuse)
    };

    state.writer = Some(open_writer(1, reuse_valid)?);
    let mut ordinal = 1u64;
    let mut buf = vec![0u8; STREAM_BUFFER_SIZE];

    let outcome: Result<()> = (|| {
        loop {
            if shutdown_requested() {
                return Err(anyhow!("interrupted while splitting"));
            }
            let n = input.read(&mut buf).context("read from compressor")?;
            if n == 0 {
                return Ok(());
            }
            state.whole.update(&buf[..n]);
            let mut offset = 0;
            while offset < n {
                let writer = state.writer.as_mut().expect("writer present");
                let take = writer.room().min((n - offset) as u64) as usize;
                writer.write(&buf[offset..offset + take])?;
                offset += take;
                if writer.full() {
                    let writer = state.writer.take().expect("writer present");
                    let (record, was_reused) = writer.commit(params)?;
                    state.bytes_out += record.length;
                    if was_reused {
                        state.reused += 1;
                    } else {
                        reuse_valid = false;
                    }
                    state.chunks.push(record);
                    ordinal += 1;
                    state.writer = Some(open_writer(ordinal, reuse_valid)?);
                }
            }
        }
    })();

    match outcome {
        Ok(()) => Ok(state),
        Err(e) => {
            if let Some(writer) = state.writer.take() {
                writer.discard();
            }
            Err(e)
        }
    }
}

/// Commit the final part and write the `.parts` list and whole-stream digest.
/// Only called once the producer finished cleanly.
pub(crate) fn finalize_split(mut pending: SplitPending, params: &SplitParams) -> Result<SplitResult> {
    if let Some(writer) = pending.writer.take() {
        if writer.has_bytes() || pending.chunks.is_empty() {
            let (record, was_reused) = writer.commit(params)?;
            pending.bytes_out += record.length;
            if was_reused {
                pending.reused += 1;
            }
            pending.chunks.push(record);
        } else {
            writer.discard();
        }
    }
    remove_stale_parts(params, pending.chunks.len() as u64)?;

    let parts_path = params.spool_dir.join(PARTS_LIST_NAME);
    let mut listing = String::new();
    for chunk in &pending.chunks {
        listing.push_str(&chunk.file_name);
        listing.push('\n');
    }
    write_sync(&parts_path, listing.as_bytes())?;

    let whole_digest = pending.whole.finalize_hex();
    write_sync(
        &params.spool_dir.join(params.whole_name()),
        format!("{whole_digest}\n").as_bytes(),
    )?;

    Ok(SplitResult {
        chunks: pending.chunks,
        whole_digest,
        bytes_out: pending.bytes_out,
        reused: pending.reused,
    })
}

/// Drop the in-progress final part of an aborted stream; committed parts stay
/// for resume.
pub(crate) fn discard_pending(mut pending: SplitPending) {
    if let Some(writer) = pending.writer.take() {
        writer.discard();
    }
}

fn write_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file =
        fs::File::create(path).context(format!("Failed to create {}", path.display()))?;
    file.write_all(content)
        .context(format!("Failed to write {}", path.display()))?;
    file.sync_all()
        .context(format!("Failed to sync {}", path.display()))?;
    Ok(())
}

/// Committed parts from a previous run: contiguous ordinals from 1, each with
/// a parseable digest sidecar.
fn scan_committed(params: &SplitParams) -> Result<Vec<ChunkRecord>> {
    let mut committed = Vec::new();
    for ordinal in 1u64.. {
        let name = params.part_name(ordinal);
        let part_path = params.spool_dir.join(&name);
        let sidecar_path = params.spool_dir.join(params.sidecar_name(&name));
        let meta = match fs::metadata(&part_path) {
            Ok(meta) if meta.is_file() => meta,
            _ => break,
        };
        let digest = match fs::read_to_string(&sidecar_path) {
            Ok(content) => match content.split_whitespace().next() {
                Some(digest) if !digest.is_empty() => digest.to_string(),
                _ => break,
            },
            Err(_) => break,
        };
        committed.push(ChunkRecord {
            file_name: name,
            length: meta.len(),
            digest,
        });
    }
    Ok(committed)
}

fn clean_stale_tmp(params: &SplitParams) -> Result<()> {
    if !params.spool_dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(&params.spool_dir).context("read spool dir")? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&params.part_prefix()) && name.ends_with(".tmp") {
            debug!("Removing stale temp file {name}");
            let _ = fs::remove_file(entry.path());
        }
    }
    Ok(())
}

/// Delete committed parts beyond the final ordinal of this run (a previous,
/// longer stream left them behind).
fn remove_stale_parts(params: &SplitParams, last_ordinal: u64) -> Result<()> {
    for ordinal in last_ordinal + 1.. {
        let name = params.part_name(ordinal);
        let part_path = params.spool_dir.join(&name);
        if !part_path.exists() {
            break;
        }
        warn!("Removing stale part {name} from a previous run");
        let _ = fs::remove_file(&part_path);
        let _ = fs::remove_file(params.spool_dir.join(params.sidecar_name(&name)));
    }
    Ok(())
}

/// Writer for one part. In reuse mode (a committed copy of this ordinal
/// exists) bytes go to a temp file; at commit time the digest decides whether
/// the committed copy stands or is replaced.
struct PartWriter {
    file_name: String,
    final_path: PathBuf,
    write_path: PathBuf,
    file: fs::File,
    written: u64,
    chunk_bytes: u64,
    hasher: HashStream,
    reuse: Option<ChunkRecord>,
}

impl PartWriter {
    fn open(params: &SplitParams, ordinal: u64, reuse: Option<ChunkRecord>) -> Result<Self> {
        let file_name = params.part_name(ordinal);
        let final_path = params.spool_dir.join(&file_name);
        let write_path = if reuse.is_some() {
            params.spool_dir.join(format!("{file_name}.tmp"))
        } else {
            final_path.clone()
        };
        let file = fs::File::create(&write_path)
            .context(format!("Failed to create {}", write_path.display()))?;
        Ok(PartWriter {
            file_name,
            final_path,
            write_path,
            file,
            written: 0,
            chunk_bytes: params.chunk_bytes,
            hasher: params.algo.hasher(),
            reuse,
        })
    }

    fn room(&self) -> u64 {
        if self.chunk_bytes == 0 {
            u64::MAX
        } else {
            self.chunk_bytes - self.written
        }
    }

    fn full(&self) -> bool {
        self.chunk_bytes != 0 && self.written >= self.chunk_bytes
    }

    fn has_bytes(&self) -> bool {
        self.written > 0
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.hasher.update(bytes);
        self.file
            .write_all(bytes)
            .context(format!("Failed to write {}", self.write_path.display()))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Fsync, then either keep the committed copy (digest match) or move the
    /// fresh bytes into place and rewrite the sidecar. Returns the record and
    /// whether the committed copy was reused.
    fn commit(self, params: &SplitParams) -> Result<(ChunkRecord, bool)> {
        self.file
            .sync_all()
            .context(format!("Failed to sync {}", self.write_path.display()))?;
        let digest = self.hasher.finalize_hex();
        let record = ChunkRecord {
            file_name: self.file_name.clone(),
            length: self.written,
            digest: digest.clone(),
        };

        if let Some(previous) = &self.reuse {
            if previous.digest == digest && previous.length == self.written {
                let _ = fs::remove_file(&self.write_path);
                debug!("Reusing committed part {}", self.file_name);
                return Ok((record, true));
            }
            warn!(
                "Committed part {} no longer matches the stream; rewriting",
                self.file_name
            );
            fs::rename(&self.write_path, &self.final_path).context(format!(
                "Failed to move {} into place",
                self.final_path.display()
            ))?;
        }

        let sidecar = params.spool_dir.join(params.sidecar_name(&self.file_name));
        write_sync(&sidecar, format!("{digest}  {}\n", self.file_name).as_bytes())?;
        Ok((record, false))
    }

    /// Remove whatever was written; used on abort.
    fn discard(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.write_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    /// Split a stream that is trusted to be complete.
    fn split_stream<R: Read>(input: R, params: &SplitParams) -> Result<SplitResult> {
        finalize_split(split_collect(input, params)?, params)
    }

    fn params(dir: &Path, chunk_bytes: u64) -> SplitParams {
        SplitParams {
            spool_dir: dir.to_path_buf(),
            base_name: "20260101_ab12z_d1_p1".to_string(),
            ext: "zst",
            chunk_bytes,
            algo: HashAlgo::Sha256,
        }
    }

    fn pattern_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn splits_at_exact_boundaries_with_short_tail() {
        let dir = TempDir::new().unwrap();
        let input = pattern_bytes((2 * MIB + MIB / 2) as usize);
        let result = split_stream(Cursor::new(input.clone()), &params(dir.path(), MIB)).unwrap();

        assert_eq!(result.chunks.len(), 3);
        assert_eq!(result.chunks[0].length, MIB);
        assert_eq!(result.chunks[1].length, MIB);
        assert_eq!(result.chunks[2].length, MIB / 2);
        assert_eq!(result.bytes_out, input.len() as u64);

        // ordinals are contiguous and listed in order
        let listing =
            fs::read_to_string(dir.path().join(PARTS_LIST_NAME)).unwrap();
        let names: Vec<&str> = listing.lines().collect();
        assert_eq!(
            names,
            vec![
                "20260101_ab12z_d1_p1.tar.zst.part0001",
                "20260101_ab12z_d1_p1.tar.zst.part0002",
                "20260101_ab12z_d1_p1.tar.zst.part0003",
            ]
        );
    }

    #[test]
    fn whole_digest_matches_concatenation() {
        let dir = TempDir::new().unwrap();
        let input = pattern_bytes((MIB + 1234) as usize);
        let result = split_stream(Cursor::new(input), &params(dir.path(), MIB)).unwrap();

        let mut concatenated = Vec::new();
        for chunk in &result.chunks {
            concatenated.extend_from_slice(&fs::read(dir.path().join(&chunk.file_name)).unwrap());
        }
        assert_eq!(
            crate::utils::hash::digest_hex(HashAlgo::Sha256, &concatenated),
            result.whole_digest
        );
        let whole_file = fs::read_to_string(dir.path().join(".whole.sha256")).unwrap();
        assert_eq!(whole_file.trim(), result.whole_digest);
    }

    #[test]
    fn sidecars_match_part_contents() {
        let dir = TempDir::new().unwrap();
        let input = pattern_bytes((MIB * 2) as usize);
        let result = split_stream(Cursor::new(input), &params(dir.path(), MIB)).unwrap();
        for chunk in &result.chunks {
            let bytes = fs::read(dir.path().join(&chunk.file_name)).unwrap();
            let digest = crate::utils::hash::digest_hex(HashAlgo::Sha256, &bytes);
            assert_eq!(digest, chunk.digest);
            let sidecar = fs::read_to_string(
                dir.path().join(format!("{}.sha256", chunk.file_name)),
            )
            .unwrap();
            assert!(sidecar.starts_with(&digest));
            assert!(sidecar.trim().ends_with(&chunk.file_name));
        }
    }

    #[test]
    fn chunking_disabled_yields_single_part() {
        let dir = TempDir::new().unwrap();
        let input = pattern_bytes((3 * MIB) as usize);
        let result = split_stream(Cursor::new(input), &params(dir.path(), 0)).unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].length, 3 * MIB);
    }

    #[test]
    fn identical_rerun_reuses_committed_parts() {
        let dir = TempDir::new().unwrap();
        let input = pattern_bytes((2 * MIB + 100) as usize);
        let p = params(dir.path(), MIB);

        let first = split_stream(Cursor::new(input.clone()), &p).unwrap();
        assert_eq!(first.reused, 0);

        let second = split_stream(Cursor::new(input), &p).unwrap();
        assert_eq!(second.reused, 3);
        assert_eq!(second.chunks, first.chunks);
        assert_eq!(second.whole_digest, first.whole_digest);
    }

    #[test]
    fn interrupted_run_resumes_from_committed_prefix() {
        let dir = TempDir::new().unwrap();
        let input = pattern_bytes((5 * MIB) as usize);
        let p = params(dir.path(), MIB);

        // simulate an interrupted run: stream only the first half; the final
        // (third) part of the truncated stream stays uncommitted
        let pending = split_collect(Cursor::new(&input[..(MIB * 5 / 2) as usize]), &p).unwrap();
        discard_pending(pending);
        assert!(dir.path().join(p.part_name(1)).exists());
        assert!(dir.path().join(p.part_name(2)).exists());
        assert!(!dir.path().join(p.part_name(3)).exists());

        // rerun with the full stream reuses parts 1-2 and produces 3-5
        let result = split_stream(Cursor::new(input), &p).unwrap();
        assert_eq!(result.chunks.len(), 5);
        assert_eq!(result.reused, 2);
    }

    #[test]
    fn changed_stream_invalidates_mismatched_suffix() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), MIB);

        let mut original = pattern_bytes((3 * MIB) as usize);
        split_stream(Cursor::new(original.clone()), &p).unwrap();

        // flip a byte early in part 2; parts 2 and 3 must be rewritten
        original[(MIB + 10) as usize] ^= 0xff;
        let result = split_stream(Cursor::new(original.clone()), &p).unwrap();
        assert_eq!(result.reused, 1);

        let part2 = fs::read(dir.path().join(p.part_name(2))).unwrap();
        assert_eq!(part2, &original[MIB as usize..(2 * MIB) as usize]);
    }

    #[test]
    fn shorter_rerun_removes_stale_parts() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), MIB);

        split_stream(Cursor::new(pattern_bytes((4 * MIB) as usize)), &p).unwrap();
        assert!(dir.path().join(p.part_name(4)).exists());

        // a shorter stream with different content from the start
        let short: Vec<u8> = vec![0xaa; (MIB + 5) as usize];
        let result = split_stream(Cursor::new(short), &p).unwrap();
        assert_eq!(result.chunks.len(), 2);
        assert!(!dir.path().join(p.part_name(3)).exists());
        assert!(!dir.path().join(p.part_name(4)).exists());
        assert!(!dir.path().join(format!("{}.sha256", p.part_name(4))).exists());
    }

    #[test]
    fn ordinal_width_grows_past_9999() {
        let p = params(Path::new("/tmp"), MIB);
        assert!(p.part_name(1).ends_with(".part0001"));
        assert!(p.part_name(12345).ends_with(".part12345"));
    }

    #[test]
    fn compressor_argv_shapes() {
        assert_eq!(
            Compressor::Zstd.argv(3, 4),
            vec!["zstd", "-q", "-T4", "-3", "-c"]
        );
        assert_eq!(
            Compressor::Pigz.argv(6, 2),
            vec!["pigz", "-p", "2", "-6", "-c"]
        );
        assert_eq!(Compressor::Zstd.extension(), "zst");
        assert_eq!(Compressor::Pigz.extension(), "gz");
    }
}
