//! Timed subprocess execution shared by the git and tmux wrappers.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Convert a non-zero exit into `Error::ExternalTool` carrying stderr.
    pub fn into_result(self, tool: &'static str, args: &[&str]) -> Result<String> {
        if self.success {
            return Ok(self.stdout);
        }
        let diagnostic = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        Err(Error::ExternalTool {
            tool,
            message: format!("{tool} {} failed: {diagnostic}", args.join(" ")),
            timed_out: false,
        })
    }
}

/// Run `program args..` in `cwd` and wait at most `timeout` for it.
///
/// A spawn failure or timeout is an `Error::ExternalTool`; a non-zero exit
/// is returned as an unsuccessful `ToolOutput` so callers can inspect stderr.
/// The child is killed if the timeout fires.
pub async fn run_tool(
    tool: &'static str,
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<ToolOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!(tool, args = %args.join(" "), "running external tool");

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(Error::ExternalTool {
                tool,
                message: format!("failed to run {program}: {e}"),
                timed_out: false,
            })
        }
        Err(_) => {
            return Err(Error::ExternalTool {
                tool,
                message: format!("{tool} {} timed out after {timeout:?}", args.join(" ")),
                timed_out: true,
            })
        }
    };

    Ok(ToolOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
