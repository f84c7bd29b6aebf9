//! Uniform child-process invocation.
//!
//! Every external tool in the pipeline goes through this executor: commands
//! are argument vectors, never shell strings; stdout/stderr are captured with
//! a bound; dry-run mode records the command and returns synthetic success.
//! Streaming stages (the compressor) get a raw piped child through
//! [`Executor::spawn_streaming`] and the same terminate semantics.

use std::env;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};

use crate::constants::{CHILD_POLL_INTERVAL_MS, CHILD_TERM_GRACE_SECS, MAX_CAPTURED_OUTPUT};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers that flip the shutdown flag. Workers and
/// child supervision loops poll the flag; nothing async happens in the
/// handler itself.
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

#[cfg(test)]
pub fn reset_shutdown_for_tests() {
    SHUTDOWN.store(false, Ordering::SeqCst);
}

/// Captured result of a completed command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Per-invocation knobs; `Default` means no timeout, inherited environment.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub timeout: Option<Duration>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Executor {
    dry_run: bool,
}

impl Executor {
    pub fn new(dry_run: bool) -> Self {
        Executor { dry_run }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run a command to completion, capturing bounded stdout/stderr.
    /// A nonzero exit is not an error here; callers inspect `code`.
    pub fn run(&self, argv: &[&str]) -> Result<ExecOutput> {
        self.run_with(argv, &ExecOptions::default())
    }

    /// Like [`Executor::run`] but failing on nonzero exit with stderr detail.
    pub fn run_checked(&self, argv: &[&str]) -> Result<ExecOutput> {
        let output = self.run(argv)?;
        if !output.success() {
            return Err(anyhow!(
                "{} exited {}: {}",
                shell_join(argv),
                output.code,
                output.stderr.trim()
            ));
        }
        Ok(output)
    }

    pub fn run_with(&self, argv: &[&str], opts: &ExecOptions) -> Result<ExecOutput> {
        if argv.is_empty() {
            return Err(anyhow!("empty argument vector"));
        }
        if self.dry_run {
            info!("[dry-run] {}", shell_join(argv));
            return Ok(ExecOutput {
                code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::ZERO,
            });
        }

        debug!("exec: {}", shell_join(argv));
        let start = Instant::now();
        let mut cmd = Command::new(argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &opts.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }
        let mut child = cmd
            .spawn()
            .context(format!("Failed to spawn {}", shell_join(argv)))?;

        let stdout_handle = drain_bounded(child.stdout.take());
        let stderr_handle = drain_bounded(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait().context("Failed to wait on child")? {
                break status;
            }
            if let Some(timeout) = opts.timeout {
                if start.elapsed() > timeout {
                    terminate_child(&mut child);
                    return Err(anyhow!(
                        "{} timed out after {:?}",
                        shell_join(argv),
                        timeout
                    ));
                }
            }
            if shutdown_requested() {
                terminate_child(&mut child);
                return Err(anyhow!("{} interrupted by shutdown", shell_join(argv)));
            }
            thread::sleep(Duration::from_millis(CHILD_POLL_INTERVAL_MS));
        };

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();
        Ok(ExecOutput {
            code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            duration: start.elapsed(),
        })
    }

    /// Spawn a long-lived child with piped stdin/stdout for streaming stages.
    /// stderr stays piped for the caller to drain. Never used in dry-run
    /// mode; streaming callers short-circuit before building a pipeline.
    pub fn spawn_streaming(&self, argv: &[&str]) -> Result<Child> {
        if argv.is_empty() {
            return Err(anyhow!("empty argument vector"));
        }
        debug!("exec (streaming): {}", shell_join(argv));
        Command::new(argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context(format!("Failed to spawn {}", shell_join(argv)))
    }
}

/// SIGTERM, bounded grace, then SIGKILL. Reaps the child either way.
pub fn terminate_child(child: &mut Child) {
    let pid = child.id() as libc::pid_t;
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    let deadline = Instant::now() + Duration::from_secs(CHILD_TERM_GRACE_SECS);
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => thread::sleep(Duration::from_millis(CHILD_POLL_INTERVAL_MS)),
            Err(e) => {
                warn!("Failed to reap child {pid}: {e}");
                return;
            }
        }
    }
    if let Err(e) = child.kill() {
        warn!("SIGKILL of child {pid} failed: {e}");
    }
    let _ = child.wait();
}

/// Drain a child stream on a helper thread, keeping at most
/// [`MAX_CAPTURED_OUTPUT`] bytes but always reading to EOF so the child is
/// never blocked on a full pipe.
pub(crate) fn drain_bounded<R: std::io::Read + Send + 'static>(
    stream: Option<R>,
) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut captured: Vec<u8> = Vec::new();
        if let Some(mut stream) = stream {
            let mut buf = [0u8; 8192];
            loop {
                match std::io::Read::read(&mut stream, &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let room = MAX_CAPTURED_OUTPUT.saturating_sub(captured.len());
                        captured.extend_from_slice(&buf[..n.min(room)]);
                    }
                }
            }
        }
        String::from_utf8_lossy(&captured).into_owned()
    })
}

/// Render an argv for logs, quoting arguments with whitespace.
pub fn shell_join(argv: &[&str]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '\'') {
                format!("'{}'", arg.replace('\'', "'\\''"))
            } else {
                (*arg).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Locate a binary on PATH. The bundle's `bin/` overlay is already applied
/// to PATH by the time anything calls this.
pub fn lookup_binary(name: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

pub fn have_binary(name: &str) -> bool {
    lookup_binary(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_code() {
        let exec = Executor::new(false);
        let out = exec.run(&["echo", "hello"]).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn nonzero_exit_is_reported_not_raised() {
        let exec = Executor::new(false);
        let out = exec.run(&["ls", "/definitely/not/a/path"]).unwrap();
        assert!(!out.success());
        assert!(!out.stderr.is_empty());
        assert!(exec.run_checked(&["ls", "/definitely/not/a/path"]).is_err());
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let exec = Executor::new(false);
        assert!(exec.run(&["rs-salvage-no-such-binary"]).is_err());
    }

    #[test]
    fn dry_run_executes_nothing() {
        let exec = Executor::new(true);
        let out = exec.run(&["rs-salvage-no-such-binary", "--flag"]).unwrap();
        assert!(out.success());
        assert!(out.stdout.is_empty());
    }

    #[test]
    fn timeout_kills_the_child() {
        reset_shutdown_for_tests();
        let exec = Executor::new(false);
        let opts = ExecOptions {
            timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let err = exec.run_with(&["sleep", "30"], &opts).unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }

    #[test]
    fn shell_join_quotes_whitespace() {
        assert_eq!(shell_join(&["mount", "-o", "ro"]), "mount -o ro");
        assert_eq!(shell_join(&["echo", "a b"]), "echo 'a b'");
    }

    #[test]
    fn lookup_finds_common_binaries() {
        assert!(have_binary("sh"));
        assert!(!have_binary("rs-salvage-no-such-binary"));
    }
}
