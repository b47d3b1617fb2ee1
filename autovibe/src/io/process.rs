//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to keep draining pipes after the child is gone.
///
/// Grandchildren that inherited stdout can keep a pipe open forever; after this
/// window the reader is detached and whatever was captured is returned.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Limits applied to one child process.
#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    /// Wall-clock limit before the child is killed.
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub output_limit_bytes: usize,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Lossy stdout with a trailing notice when bytes were dropped.
    pub fn stdout_text(&self) -> String {
        with_notice(&self.stdout, self.stdout_truncated, "stdout")
    }

    pub fn stderr_text(&self) -> String {
        with_notice(&self.stderr, self.stderr_truncated, "stderr")
    }

    /// Both streams in one block, labelled, for logs and diagnostics.
    pub fn combined_text(&self) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&self.stdout_text());
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&self.stderr_text());
        if self.timed_out {
            buf.push_str("\n[timed out]\n");
        }
        buf
    }
}

fn with_notice(bytes: &[u8], truncated: usize, label: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{label} truncated {truncated} bytes]\n"));
    }
    text
}

#[derive(Default)]
struct Capture {
    buf: Vec<u8>,
    truncated: usize,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. On timeout the child is
/// killed and `timed_out` is set; this is a normal return, not an error. Errors
/// mean the child could not be spawned or waited on.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), output_limit_bytes = limits.output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: ProcessLimits,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let (stdout_capture, stdout_done) = spawn_reader(stdout, limits.output_limit_bytes);
    let (stderr_capture, stderr_done) = spawn_reader(stderr, limits.output_limit_bytes);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Detached: a child that never reads must not hold up the timeout.
        thread::spawn(move || {
            if let Err(e) = child_stdin.write_all(&input) {
                // The child may exit before reading its input; its output still matters.
                warn!(err = %e, "failed to write child stdin");
            }
        });
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = collect(&stdout_capture, &stdout_done, "stdout")?;
    let (stderr, stderr_truncated) = collect(&stderr_capture, &stderr_done, "stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    limit: usize,
) -> (Arc<Mutex<Capture>>, Receiver<()>) {
    let capture = Arc::new(Mutex::new(Capture::default()));
    let (done_tx, done_rx) = mpsc::channel();
    let sink = Arc::clone(&capture);
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(err = %e, "read child output");
                    break;
                }
            };
            let Ok(mut captured) = sink.lock() else {
                break;
            };
            let remaining = limit.saturating_sub(captured.buf.len());
            let keep = n.min(remaining);
            captured.buf.extend_from_slice(&chunk[..keep]);
            captured.truncated += n - keep;
        }
        let _ = done_tx.send(());
    });
    (capture, done_rx)
}

fn collect(
    capture: &Arc<Mutex<Capture>>,
    done: &Receiver<()>,
    label: &str,
) -> Result<(Vec<u8>, usize)> {
    match done.recv_timeout(DRAIN_GRACE) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream = label, "pipe still open after child exit, detaching reader");
        }
    }
    let mut captured = capture
        .lock()
        .map_err(|_| anyhow!("{label} capture lock poisoned"))?;
    let truncated = captured.truncated;
    Ok((std::mem::take(&mut captured.buf), truncated))
}
