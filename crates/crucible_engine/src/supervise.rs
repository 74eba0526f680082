//! Child process supervision: capture, deadline, terminate-then-kill.
//!
//! Every execution path spawns its child through [`run_with_deadline`].
//! Stdout and stderr are drained by dedicated reader threads so a chatty
//! child never blocks on a full pipe, while the supervising thread polls
//! for exit, deadline expiry, and external cancellation.

use crate::cancel::CancellationToken;
use anyhow::{Context, Result};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Poll interval for exit/cancellation checks.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Grace period between terminate and force-kill.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Cap on captured bytes per stream; output beyond this is discarded.
const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;

/// What happened to a supervised child.
#[derive(Debug)]
pub struct ChildOutcome {
    /// Exit status; `None` when the child was killed by the supervisor.
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    /// The deadline fired.
    pub timed_out: bool,
    /// An external cancel request fired first.
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl ChildOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }
}

/// Spawn `cmd` and supervise it until exit, deadline, or cancellation.
pub fn run_with_deadline(
    cmd: &mut Command,
    deadline: Duration,
    token: &CancellationToken,
) -> Result<ChildOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = cmd.spawn().context("Failed to spawn child process")?;
    let pid = child.id();
    debug!("spawned child pid={} deadline={:?}", pid, deadline);

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .context("Failed to poll child process status")?
        {
            break Some(status);
        }

        if token.is_cancelled() {
            cancelled = true;
            warn!("cancelling child pid={} on external request", pid);
            terminate_then_kill(&mut child);
            break None;
        }

        if start.elapsed() >= deadline {
            timed_out = true;
            warn!(
                "child pid={} exceeded deadline of {:?}, terminating",
                pid, deadline
            );
            terminate_then_kill(&mut child);
            break None;
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    let stdout = join_reader(stdout_reader);
    let stderr = join_reader(stderr_reader);

    Ok(ChildOutcome {
        status,
        stdout,
        stderr,
        timed_out,
        cancelled,
        elapsed: start.elapsed(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> Option<JoinHandle<String>> {
    let mut source = source?;
    Some(std::thread::spawn(move || {
        let mut collected = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if collected.len() < MAX_CAPTURE_BYTES {
                        let take = n.min(MAX_CAPTURE_BYTES - collected.len());
                        collected.extend_from_slice(&buf[..take]);
                    }
                }
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }))
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Signal the child to terminate, wait out the grace period, then kill.
fn terminate_then_kill(child: &mut Child) {
    #[cfg(unix)]
    {
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        let grace_start = Instant::now();
        while grace_start.elapsed() < KILL_GRACE {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_captures_stdout_and_exit() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2");
        let outcome =
            run_with_deadline(&mut cmd, Duration::from_secs(5), &CancellationToken::new())
                .unwrap();
        assert_eq!(outcome.exit_code(), Some(0));
        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
        assert!(!outcome.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn test_deadline_kills_runaway_child() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30");
        let start = Instant::now();
        let outcome =
            run_with_deadline(&mut cmd, Duration::from_secs(1), &CancellationToken::new())
                .unwrap();
        assert!(outcome.timed_out);
        assert!(outcome.status.is_none());
        // Deadline plus at most the kill grace.
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_external_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30");
        let outcome = run_with_deadline(&mut cmd, Duration::from_secs(30), &token).unwrap();
        assert!(outcome.cancelled);
        assert!(!outcome.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_reported() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exit 3");
        let outcome =
            run_with_deadline(&mut cmd, Duration::from_secs(5), &CancellationToken::new())
                .unwrap();
        assert_eq!(outcome.exit_code(), Some(3));
    }
}
