//! Child process execution behind `Process` grants.
//!
//! The program is spawned directly (no shell) with a cleared environment,
//! stdin closed, and a wall-clock timeout. On timeout the child is killed
//! (`kill_on_drop`) and the caller gets [`ProcessError::TimedOut`].

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;

/// Environment variables passed through to children.
const INHERITED_ENV: &[&str] = &["PATH", "LANG"];

/// What to run.
#[derive(Debug, Clone)]
pub(crate) struct ProcessRequest<'a> {
    pub(crate) program: &'a str,
    pub(crate) args: &'a [String],
    pub(crate) cwd: &'a Path,
    pub(crate) timeout: Duration,
    pub(crate) max_output_bytes: usize,
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProcessOutput {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    /// `None` when the process was terminated by a signal.
    pub(crate) exit_code: Option<i32>,
    pub(crate) success: bool,
}

#[derive(Debug, Error)]
pub(crate) enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {}s and was killed", .after.as_secs())]
    TimedOut { program: String, after: Duration },
}

/// Spawns the process and waits for it under the request's timeout.
pub(crate) async fn run_process(req: ProcessRequest<'_>) -> Result<ProcessOutput, ProcessError> {
    let mut cmd = tokio::process::Command::new(req.program);
    cmd.args(req.args)
        .current_dir(req.cwd)
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for name in INHERITED_ENV {
        if let Some(value) = std::env::var_os(name) {
            cmd.env(name, value);
        }
    }

    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: req.program.to_string(),
        source,
    })?;

    tracing::debug!(program = req.program, args = ?req.args, cwd = %req.cwd.display(), "process spawned");

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(req.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ProcessError::Wait {
                program: req.program.to_string(),
                source,
            })
        }
        Err(_) => {
            tracing::warn!(program = req.program, timeout_secs = req.timeout.as_secs(), "process timed out");
            return Err(ProcessError::TimedOut {
                program: req.program.to_string(),
                after: req.timeout,
            });
        }
    };

    Ok(ProcessOutput {
        stdout: truncate_lossy(&output.stdout, req.max_output_bytes),
        stderr: truncate_lossy(&output.stderr, req.max_output_bytes),
        exit_code: output.status.code(),
        success: output.status.success(),
    })
}

/// Decodes at most `limit` bytes as UTF-8, replacing invalid sequences.
fn truncate_lossy(bytes: &[u8], limit: usize) -> String {
    let slice = if bytes.len() > limit { &bytes[..limit] } else { bytes };
    String::from_utf8_lossy(slice).to_string()
}
