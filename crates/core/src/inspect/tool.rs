//! Subprocess runner for external helper tools.
//!
//! All tool invocations in this crate go through [`run_tool`]: stdio is
//! captured, a bounded timeout applies, and the three failure modes
//! (missing tool, non-zero exit, expiry) map onto
//! [`Error::ExternalTool`](crate::error::Error::ExternalTool) with
//! remediation text naming what to install.

use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Default bound on one external tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Captured output of a finished tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Spawn `program` with `args`, wait at most `timeout`, and return captured
/// output on a zero exit status.
///
/// `install_hint` is surfaced when the tool is not present at all, so the
/// user learns which package to install rather than just "No such file".
pub fn run_tool<I, S>(program: &Path, args: I, timeout: Duration, install_hint: &str) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let tool = program.display().to_string();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            let reason = if e.kind() == std::io::ErrorKind::NotFound {
                format!("not found - {install_hint}")
            } else {
                format!("failed to spawn: {e}")
            };
            Error::ExternalTool { tool: tool.clone(), reason }
        })?;

    // Drain the pipes on separate threads so a chatty tool cannot deadlock
    // against a full pipe buffer while we poll for exit.
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_reader = std::thread::spawn(move || read_pipe(stdout_pipe));
    let stderr_reader = std::thread::spawn(move || read_pipe(stderr_pipe));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::ExternalTool {
                        tool,
                        reason: format!("timed out after {}s", timeout.as_secs()),
                    });
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                return Err(Error::ExternalTool { tool, reason: format!("wait failed: {e}") });
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        return Err(Error::ExternalTool {
            tool,
            reason: format!("exited with {status}: {}", stderr.trim()),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).to_string()
}
