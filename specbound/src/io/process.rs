//! Child process runner with a wall-clock timeout and bounded output capture.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// What a finished (or killed) child left behind.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded past the capture limit, stdout and stderr combined.
    pub discarded_bytes: usize,
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Last `max_chars` characters of stderr, for error messages.
    pub fn stderr_tail(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let trimmed = text.trim();
        let count = trimmed.chars().count();
        if count <= max_chars {
            return trimmed.to_string();
        }
        let tail: String = trimmed.chars().skip(count - max_chars).collect();
        format!("...{tail}")
    }
}

/// Run `cmd`, feeding `stdin` if given, and wait at most `timeout`.
///
/// Both pipes are drained on their own threads so a chatty child cannot block
/// on a full pipe. At most `capture_limit` bytes per stream are kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), capture_limit))]
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    capture_limit: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn command");
        anyhow!(err).context("spawn command")
    })?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        pipe.write_all(input).context("write stdin")?;
        // Dropping the handle closes stdin so the child sees EOF.
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || drain(stdout, capture_limit));
    let stderr_reader = thread::spawn(move || drain(stderr, capture_limit));

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let (stdout, stdout_discarded) = join(stdout_reader).context("collect stdout")?;
    let (stderr, stderr_discarded) = join(stderr_reader).context("collect stderr")?;
    let discarded_bytes = stdout_discarded + stderr_discarded;
    if discarded_bytes > 0 {
        warn!(discarded_bytes, "command output exceeded capture limit");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        discarded_bytes,
        timed_out,
    })
}

fn join(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn drain<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut discarded = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok((kept, discarded));
        }
        let room = limit.saturating_sub(kept.len()).min(n);
        kept.extend_from_slice(&chunk[..room]);
        discarded += n - room;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn captures_stdout_from_stdin() {
        let output = run_with_timeout(
            Command::new("cat"),
            Some(b"hello"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run cat");
        assert!(output.status.success());
        assert!(!output.timed_out);
        assert_eq!(output.stdout, b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn output_beyond_limit_is_discarded() {
        let output = run_with_timeout(
            Command::new("cat"),
            Some(b"0123456789"),
            Duration::from_secs(10),
            4,
        )
        .expect("run cat");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.discarded_bytes, 6);
    }

    #[cfg(unix)]
    #[test]
    fn slow_commands_are_killed() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output = run_with_timeout(cmd, None, Duration::from_millis(100), 1024).expect("run");
        assert!(output.timed_out);
    }

    #[test]
    fn missing_binary_fails_to_spawn() {
        let err = run_with_timeout(
            Command::new("specbound-definitely-missing-binary"),
            None,
            Duration::from_secs(1),
            16,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("spawn command"));
    }

    #[cfg(unix)]
    #[test]
    fn stderr_tail_keeps_the_end() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'abcdefghij' >&2"]);
        let output = run_with_timeout(cmd, None, Duration::from_secs(10), 1024).expect("run");
        assert_eq!(output.stderr_tail(4), "...ghij");
        assert_eq!(output.stderr_tail(40), "abcdefghij");
    }
}
