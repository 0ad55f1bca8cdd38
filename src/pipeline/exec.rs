//! Blocking-style invocation of external tools with a hard timeout.
//!
//! Every external program md2tex drives (Inkscape, rsvg-convert, pandoc,
//! XeLaTeX) goes through [`run_tool`]. The child is spawned with
//! `kill_on_drop`, so when the timeout fires and the future is dropped the
//! process is killed rather than left running in the background.

use crate::error::Md2TexError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Why a tool could not be run to completion.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("'{tool}' is not installed or not on PATH")]
    NotFound { tool: String },

    #[error("failed to start '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },
}

impl ExecError {
    /// Convert into a fatal error, attaching an install hint for missing tools.
    pub fn into_fatal(self, hint: &str) -> Md2TexError {
        match self {
            ExecError::NotFound { tool } => Md2TexError::ToolNotFound {
                tool,
                hint: hint.to_string(),
            },
            ExecError::Timeout { tool, secs } => Md2TexError::ToolTimeout { tool, secs },
            ExecError::Spawn { tool, source } => {
                Md2TexError::Internal(format!("failed to start '{tool}': {source}"))
            }
        }
    }
}

/// Locate `program` on `PATH`.
pub fn find_tool(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Run `program` with `args`, capturing stdout and stderr.
///
/// A non-zero exit is *not* an error here; callers decide what exit codes
/// mean for their tool.
pub async fn run_tool<I, S>(
    program: &str,
    args: I,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<ToolOutput, ExecError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let binary = find_tool(program).ok_or_else(|| ExecError::NotFound {
        tool: program.to_string(),
    })?;

    let mut cmd = Command::new(&binary);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!("Running {} (timeout {}s)", binary.display(), timeout.as_secs());

    let child = cmd.spawn().map_err(|e| ExecError::Spawn {
        tool: program.to_string(),
        source: e,
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ExecError::Timeout {
            tool: program.to_string(),
            secs: timeout.as_secs(),
        })?
        .map_err(|e| ExecError::Spawn {
            tool: program.to_string(),
            source: e,
        })?;

    Ok(ToolOutput {
        status: output.status.code(),
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
