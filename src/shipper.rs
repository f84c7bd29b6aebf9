//! Resumable chunk transfer to the remote archival target.
//!
//! Transport is blocking SFTP over ssh2. Each chunk is shipped exactly once
//! per `(filename, digest)` pair: complete remote copies are reverified by
//! reading them back through the hash, partial copies are appended to and
//! then reverified, mismatches are re-uploaded once before the volume is
//! declared an integrity failure. Transport errors reconnect and retry with
//! exponential backoff. The manifest is uploaded last; a remote manifest
//! whose whole-stream digest disagrees with the local one aborts the ship
//! without overwriting anything.

use std::fmt;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use ssh2::{OpenFlags, OpenType, Session, Sftp};

use crate::config::Config;
use crate::constants::{
    MANIFEST_NAME, PARTS_LIST_NAME, SHIP_BUFFER_SIZE, SHIP_MAX_RETRIES,
    SHIP_RETRY_BASE_DELAY_MS, SHIP_RETRY_MAX_DELAY_SECS, SSH_CONNECT_TIMEOUT_SECS,
};
use crate::exec::shutdown_requested;
use crate::models::{ChunkRecord, Manifest};
use crate::utils::hash::HashAlgo;

/// `user@host:/base/path`, rsync-style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub base_path: String,
}

impl RemoteTarget {
    pub fn parse(remote: &str) -> Result<Self> {
        let (user, rest) = remote
            .split_once('@')
            .ok_or_else(|| anyhow!("remote target must be user@host:/path, got {remote:?}"))?;
        let (host, base_path) = rest
            .split_once(':')
            .ok_or_else(|| anyhow!("remote target must be user@host:/path, got {remote:?}"))?;
        if user.is_empty() || host.is_empty() || !base_path.starts_with('/') {
            return Err(anyhow!(
                "remote target must be user@host:/absolute/path, got {remote:?}"
            ));
        }
        Ok(RemoteTarget {
            user: user.to_string(),
            host: host.to_string(),
            base_path: base_path.trim_end_matches('/').to_string(),
        })
    }
}

/// Shipping failure, split by how the orchestrator records it.
#[derive(Debug)]
pub enum ShipError {
    Transport(anyhow::Error),
    Integrity { chunk: String, detail: String },
}

impl fmt::Display for ShipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipError::Transport(e) => write!(f, "{e:#}"),
            ShipError::Integrity { chunk, detail } => write!(f, "{chunk}: {detail}"),
        }
    }
}

impl std::error::Error for ShipError {}

#[derive(Debug, Default, Clone, Copy)]
pub struct ShipOutcome {
    /// Bytes actually written to the remote (resume counts only the delta).
    pub bytes_out: u64,
    /// Chunks uploaded or completed this run.
    pub uploaded: usize,
    /// Chunks already present remotely and verified untouched.
    pub reused: usize,
}

struct Conn {
    // session must outlive sftp; both move together
    _session: Session,
    sftp: Sftp,
}

pub struct Shipper {
    target: RemoteTarget,
    key_path: PathBuf,
    port: u16,
    bwlimit_kbps: u64,
    dry_run: bool,
}

impl Shipper {
    pub fn new(config: &Config, dry_run: bool) -> Result<Self> {
        let target = RemoteTarget::parse(config.server.remote.trim())?;
        Ok(Shipper {
            target,
            key_path: config.server.ssh_key.clone(),
            port: config.server.port,
            bwlimit_kbps: config.runtime.bwlimit_kbps,
            dry_run,
        })
    }

    /// Transfer one volume's spool directory under
    /// `<base>/<date>/<token>/<archive_base>/`.
    pub fn ship_volume(
        &self,
        spool_dir: &Path,
        date: &str,
        token: &str,
        manifest: &Manifest,
        algo: HashAlgo,
    ) -> std::result::Result<ShipOutcome, ShipError> {
        let remote_dir = format!(
            "{}/{}/{}/{}",
            self.target.base_path, date, token, manifest.archive
        );
        if self.dry_run {
            info!(
                "[dry-run] sftp {} -> {}@{}:{}",
                spool_dir.display(),
                self.target.user,
                self.target.host,
                remote_dir
            );
            return Ok(ShipOutcome::default());
        }

        let mut conn: Option<Conn> = None;
        let mut outcome = ShipOutcome::default();

        self.with_conn(&mut conn, |conn| {
            ensure_remote_dirs(&conn.sftp, &remote_dir)
        })?;

        self.check_remote_manifest(&mut conn, &remote_dir, manifest)?;

        for chunk in &manifest.chunks {
            if shutdown_requested() {
                return Err(ShipError::Transport(anyhow!("interrupted during transfer")));
            }
            let local_path = spool_dir.join(&chunk.file_name);
            let shipped = self.ship_chunk(&mut conn, &remote_dir, &local_path, chunk, algo)?;
            outcome.bytes_out += shipped.bytes_out;
            if shipped.uploaded > 0 {
                outcome.uploaded += 1;
            } else {
                outcome.reused += 1;
            }

            // sidecar travels with its chunk
            let sidecar = format!("{}.{}", chunk.file_name, algo.extension());
            outcome.bytes_out +=
                self.upload_small(&mut conn, &remote_dir, spool_dir, &sidecar)?;
        }

        outcome.bytes_out +=
            self.upload_small(&mut conn, &remote_dir, spool_dir, PARTS_LIST_NAME)?;
        let whole_name = format!(".whole.{}", algo.extension());
        outcome.bytes_out +=
            self.upload_small(&mut conn, &remote_dir, spool_dir, &whole_name)?;
        // manifest goes last; its presence marks the volume complete
        outcome.bytes_out +=
            self.upload_small(&mut conn, &remote_dir, spool_dir, MANIFEST_NAME)?;

        self.remove_shipped_chunks(spool_dir, manifest, algo);
        info!(
            "Shipped {}: {} uploaded, {} already present, {} bytes out",
            manifest.archive, outcome.uploaded, outcome.reused, outcome.bytes_out
        );
        Ok(outcome)
    }

    fn connect(&self) -> Result<Conn> {
        let address = format!("{}:{}", self.target.host, self.port);
        let tcp = TcpStream::connect(&address)
            .context(format!("Failed to connect to {address}"))?;
        tcp.set_read_timeout(Some(Duration::from_secs(SSH_CONNECT_TIMEOUT_SECS)))
            .context("Failed to set read timeout")?;
        tcp.set_write_timeout(Some(Duration::from_secs(SSH_CONNECT_TIMEOUT_SECS)))
            .context("Failed to set write timeout")?;

        let mut session = Session::new().context("Failed to create SSH session")?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .context("Failed to perform SSH handshake")?;
        session
            .userauth_pubkey_file(&self.target.user, None, &self.key_path, None)
            .context(format!(
                "Failed to authenticate with private key {}",
                self.key_path.display()
            ))?;
        if !session.authenticated() {
            return Err(anyhow!("SSH authentication failed"));
        }
        let sftp = session.sftp().context("Failed to create SFTP subsystem")?;
        debug!("Connected to {}@{address}", self.target.user);
        Ok(Conn { _session: session, sftp })
    }

    /// Run an operation with reconnect-and-backoff on transport errors.
    fn with_conn<T>(
        &self,
        conn: &mut Option<Conn>,
        mut op: impl FnMut(&mut Conn) -> Result<T>,
    ) -> std::result::Result<T, ShipError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if conn.is_none() {
                match self.connect() {
                    Ok(fresh) => *conn = Some(fresh),
                    Err(e) => {
                        if attempt >= SHIP_MAX_RETRIES {
                            return Err(ShipError::Transport(e));
                        }
                        let delay = backoff_delay(attempt);
                        warn!("Connect attempt {attempt} failed ({e:#}); retrying in {delay:?}");
                        thread::sleep(delay);
                        continue;
                    }
                }
            }
            match op(conn.as_mut().expect("connection present")) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    *conn = None;
                    if attempt >= SHIP_MAX_RETRIES {
                        return Err(ShipError::Transport(e));
                    }
                    let delay = backoff_delay(attempt);
                    warn!("Transfer attempt {attempt} failed ({e:#}); retrying in {delay:?}");
                    thread::sleep(delay);
                }
            }
        }
    }

    /// Refuse to overwrite a remote manifest that disagrees about the stream.
    fn check_remote_manifest(
        &self,
        conn: &mut Option<Conn>,
        remote_dir: &str,
        manifest: &Manifest,
    ) -> std::result::Result<(), ShipError> {
        let remote_path = format!("{remote_dir}/{MANIFEST_NAME}");
        let existing = self.with_conn(conn, |conn| {
            let mut file = match conn.sftp.open(Path::new(&remote_path)) {
                Ok(file) => file,
                Err(_) => return Ok(None), // absent: first ship of this volume
            };
            let mut content = String::new();
            file.read_to_string(&mut content)
                .context("read remote manifest")?;
            Ok(Some(content))
        })?;

        if let Some(content) = existing {
            let remote: Manifest = serde_json::from_str(&content).map_err(|e| {
                ShipError::Integrity {
                    chunk: MANIFEST_NAME.to_string(),
                    detail: format!("remote manifest unreadable: {e}"),
                }
            })?;
            if remote.whole_digest != manifest.whole_digest {
                return Err(ShipError::Integrity {
                    chunk: MANIFEST_NAME.to_string(),
                    detail: format!(
                        "remote manifest records a different stream ({} != {}); refusing to overwrite",
                        remote.whole_digest, manifest.whole_digest
                    ),
                });
            }
            debug!("Remote manifest for {} matches; resuming", manifest.archive);
        }
        Ok(())
    }

    /// Ship one chunk: resume or upload, then verify by reading the remote
    /// copy back through the hash. One automatic re-upload on mismatch.
    fn ship_chunk(
        &self,
        conn: &mut Option<Conn>,
        remote_dir: &str,
        local_path: &Path,
        chunk: &ChunkRecord,
        algo: HashAlgo,
    ) -> std::result::Result<ShipOutcome, ShipError> {
        let remote_path = format!("{remote_dir}/{}", chunk.file_name);
        let mut result = ShipOutcome::default();

        for round in 0..2 {
            let force_fresh = round > 0;
            let bwlimit = self.bwlimit_kbps;
            let written = self.with_conn(conn, |conn| {
                transfer_chunk(&conn.sftp, local_path, &remote_path, chunk, force_fresh, bwlimit)
            })?;
            result.bytes_out += written.bytes_out;
            result.uploaded += written.uploaded;

            let verified = self.with_conn(conn, |conn| {
                verify_remote(&conn.sftp, &remote_path, chunk, algo)
            })?;
            if verified {
                return Ok(result);
            }
            warn!(
                "Digest mismatch on remote {}; re-uploading once",
                chunk.file_name
            );
        }
        Err(ShipError::Integrity {
            chunk: chunk.file_name.clone(),
            detail: "digest mismatch after re-upload".to_string(),
        })
    }

    fn upload_small(
        &self,
        conn: &mut Option<Conn>,
        remote_dir: &str,
        spool_dir: &Path,
        name: &str,
    ) -> std::result::Result<u64, ShipError> {
        let local_path = spool_dir.join(name);
        let content = fs::read(&local_path).map_err(|e| {
            ShipError::Transport(anyhow!("read {}: {e}", local_path.display()))
        })?;
        let remote_path = format!("{remote_dir}/{name}");
        self.with_conn(conn, |conn| {
            let mut file = conn
                .sftp
                .create(Path::new(&remote_path))
                .context(format!("create remote {remote_path}"))?;
            file.write_all(&content)
                .context(format!("write remote {remote_path}"))?;
            Ok(())
        })?;
        Ok(content.len() as u64)
    }

    /// Confirmed chunks are dropped from the spool; metadata stays behind for
    /// audit and future resume checks.
    fn remove_shipped_chunks(&self, spool_dir: &Path, manifest: &Manifest, algo: HashAlgo) {
        for chunk in &manifest.chunks {
            let part = spool_dir.join(&chunk.file_name);
            let sidecar = spool_dir.join(format!("{}.{}", chunk.file_name, algo.extension()));
            if let Err(e) = fs::remove_file(&part) {
                warn!("Could not remove shipped chunk {}: {e}", part.display());
            }
            let _ = fs::remove_file(sidecar);
        }
    }
}

/// One transfer attempt for a chunk; resumes partial remote files in place.
fn transfer_chunk(
    sftp: &Sftp,
    local_path: &Path,
    remote_path: &str,
    chunk: &ChunkRecord,
    force_fresh: bool,
    bwlimit_kbps: u64,
) -> Result<ShipOutcome> {
    let mut outcome = ShipOutcome::default();
    let remote_size = match sftp.stat(Path::new(remote_path)) {
        Ok(stat) => stat.size,
        Err(_) => None,
    };

    let resume_from = match remote_size {
        _ if force_fresh => {
            let _ = sftp.unlink(Path::new(remote_path));
            0
        }
        Some(size) if size == chunk.length => {
            debug!("Remote {} complete; verifying only", chunk.file_name);
            return Ok(outcome);
        }
        Some(size) if size < chunk.length => {
            info!(
                "Resuming {} at byte {size} of {}",
                chunk.file_name, chunk.length
            );
            size
        }
        Some(_) => {
            // remote is larger than the committed chunk; start over
            let _ = sftp.unlink(Path::new(remote_path));
            0
        }
        None => 0,
    };

    let mut local = fs::File::open(local_path)
        .context(format!("open local chunk {}", local_path.display()))?;
    local
        .seek(SeekFrom::Start(resume_from))
        .context("seek local chunk")?;

    let mut remote = if resume_from > 0 {
        sftp.open_mode(
            Path::new(remote_path),
            OpenFlags::WRITE | OpenFlags::APPEND,
            0o644,
            OpenType::File,
        )
        .context(format!("open remote {remote_path} for append"))?
    } else {
        sftp.create(Path::new(remote_path))
            .context(format!("create remote {remote_path}"))?
    };

    let mut throttle = Throttle::new(bwlimit_kbps);
    let mut buf = vec![0u8; SHIP_BUFFER_SIZE];
    loop {
        let n = local.read(&mut buf).context("read local chunk")?;
        if n == 0 {
            break;
        }
        remote
            .write_all(&buf[..n])
            .context(format!("write remote {remote_path}"))?;
        outcome.bytes_out += n as u64;
        throttle.pace(n);
    }
    outcome.uploaded = 1;
    Ok(outcome)
}

/// Read the remote copy back through the hash and compare digests.
fn verify_remote(
    sftp: &Sftp,
    remote_path: &str,
    chunk: &ChunkRecord,
    algo: HashAlgo,
) -> Result<bool> {
    let mut remote = sftp
        .open(Path::new(remote_path))
        .context(format!("open remote {remote_path} for verification"))?;
    let mut hasher = algo.hasher();
    let mut total = 0u64;
    let mut buf = vec![0u8; SHIP_BUFFER_SIZE];
    loop {
        let n = remote.read(&mut buf).context("read remote chunk")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok(total == chunk.length && hasher.finalize_hex() == chunk.digest)
}

/// Create each directory of an absolute remote path; existing segments are
/// fine.
fn ensure_remote_dirs(sftp: &Sftp, remote_dir: &str) -> Result<()> {
    for dir in dir_chain(remote_dir) {
        match sftp.stat(Path::new(&dir)) {
            Ok(_) => continue,
            Err(_) => {
                if let Err(e) = sftp.mkdir(Path::new(&dir), 0o755) {
                    // racing another worker on the shared prefix is fine
                    if sftp.stat(Path::new(&dir)).is_err() {
                        return Err(anyhow!("mkdir {dir}: {e}"));
                    }
                }
            }
        }
    }
    Ok(())
}

/// `/a/b/c` -> `["/a", "/a/b", "/a/b/c"]`
fn dir_chain(path: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        chain.push(current.clone());
    }
    chain
}

fn backoff_delay(attempt: usize) -> Duration {
    let base = Duration::from_millis(SHIP_RETRY_BASE_DELAY_MS);
    let exp = base.saturating_mul(1u32 << (attempt.min(16) as u32 - 1));
    exp.min(Duration::from_secs(SHIP_RETRY_MAX_DELAY_SECS))
}

/// Paces writes so the average rate stays under the configured cap.
struct Throttle {
    kbps: u64,
    started: Instant,
    sent: u64,
}

impl Throttle {
    fn new(kbps: u64) -> Self {
        Throttle {
            kbps,
            started: Instant::now(),
            sent: 0,
        }
    }

    fn pace(&mut self, just_sent: usize) {
        if self.kbps == 0 {
            return;
        }
        self.sent += just_sent as u64;
        let expected = Duration::from_secs_f64(self.sent as f64 / (self.kbps * 1024) as f64);
        let actual = self.started.elapsed();
        if expected > actual {
            thread::sleep(expected - actual);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_target_parses_rsync_style() {
        let target = RemoteTarget::parse("vault@archive.example:/srv/intake/").unwrap();
        assert_eq!(target.user, "vault");
        assert_eq!(target.host, "archive.example");
        assert_eq!(target.base_path, "/srv/intake");
    }

    #[test]
    fn remote_target_rejects_malformed_strings() {
        assert!(RemoteTarget::parse("archive.example:/srv").is_err());
        assert!(RemoteTarget::parse("vault@archive.example").is_err());
        assert!(RemoteTarget::parse("vault@archive.example:relative/path").is_err());
        assert!(RemoteTarget::parse("@host:/x").is_err());
    }

    #[test]
    fn dir_chain_builds_every_prefix() {
        assert_eq!(
            dir_chain("/srv/intake/20260101/ab12z"),
            vec!["/srv", "/srv/intake", "/srv/intake/20260101", "/srv/intake/20260101/ab12z"]
        );
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(250));
        assert_eq!(backoff_delay(2), Duration::from_millis(500));
        assert!(backoff_delay(12) <= Duration::from_secs(SHIP_RETRY_MAX_DELAY_SECS));
    }

    #[test]
    fn throttle_is_inert_without_a_cap() {
        let mut throttle = Throttle::new(0);
        let start = Instant::now();
        throttle.pace(50 * 1024 * 1024);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn throttle_paces_to_the_cap() {
        // 1 MiB at 10240 KiB/s should take about 100ms
        let mut throttle = Throttle::new(10 * 1024);
        let start = Instant::now();
        throttle.pace(1024 * 1024);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(80), "{elapsed:?}");
    }
}
