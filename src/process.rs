//! Running external programs with a timeout and bounded output capture.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SubforgeError};

/// Upper bounds on how much of each stream is retained.
#[derive(Debug, Clone, Copy)]
pub struct CaptureLimits {
    pub stdout: usize,
    pub stderr: usize,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            stdout: 1024 * 1024,
            stderr: 64 * 1024,
        }
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
}

impl CommandOutput {
    /// Turn a non-zero exit into an external service error carrying the stderr tail.
    pub fn ensure_success(self, service: &str) -> Result<Self> {
        if self.status.success() {
            return Ok(self);
        }
        let stderr = self.stderr.trim();
        let message = if stderr.is_empty() {
            self.status.to_string()
        } else {
            format!("{}: {}", self.status, tail(stderr, 2000))
        };
        Err(SubforgeError::external(service, message))
    }
}

/// Substitute `{name}` placeholders in an argument template.
pub fn render_args(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}

/// Run `program` to completion. Exceeding `timeout` kills the child and fails the call.
pub async fn run_captured(
    service: &str,
    program: &str,
    args: &[String],
    timeout: Duration,
    limits: CaptureLimits,
) -> Result<CommandOutput> {
    debug!("Executing {}: {} {:?}", service, program, args);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SubforgeError::external(service, format!("failed to start {}: {}", program, e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SubforgeError::external(service, "stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| SubforgeError::external(service, "stderr not captured"))?;

    let run = async {
        let (out, err, status) = tokio::join!(
            read_bounded(stdout, limits.stdout),
            read_bounded(stderr, limits.stderr),
            child.wait()
        );
        Ok::<_, std::io::Error>((out?, err?, status?))
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(((stdout, stdout_truncated), (stderr, _), status))) => Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            stdout_truncated,
        }),
        Ok(Err(e)) => Err(SubforgeError::external(service, format!("I/O error: {}", e))),
        Err(_) => Err(SubforgeError::external(
            service,
            format!("timed out after {}s", timeout.as_secs()),
        )),
    }
}

// Keeps draining past the limit so the child never blocks on a full pipe
async fn read_bounded<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        if room < n {
            truncated = true;
        }
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }

    Ok((kept, truncated))
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = text
        .char_indices()
        .nth(count - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[skip..]
}
