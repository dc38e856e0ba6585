use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Ensured, SessionLaunch, TerminalSessionService};
use crate::error::{Error, Result};
use crate::process::{run_tool, ToolOutput};

/// Dedicated tmux socket name, isolating threadbox sessions from the user's tmux.
/// Dev builds use "threadbox-dev" to avoid interfering with an installed release binary.
pub const TMUX_SOCKET: &str = if cfg!(dev_build) {
    "threadbox-dev"
} else {
    "threadbox"
};

/// Minimum tmux version required (`new-session -e`).
const MIN_TMUX_VERSION: (u32, u32) = (3, 2);

/// stderr fragments tmux prints when the target session or server is gone.
const MISSING_SESSION_MARKERS: &[&str] = &[
    "can't find session",
    "can't find pane",
    "can't find window",
    "session not found",
    "no server running",
    "error connecting to",
];

/// `TerminalSessionService` backed by `tmux -L threadbox`.
#[derive(Debug, Clone)]
pub struct TmuxSessions {
    socket: String,
    timeout: Duration,
}

impl TmuxSessions {
    pub fn new(timeout: Duration) -> Self {
        Self::with_socket(TMUX_SOCKET, timeout)
    }

    pub fn with_socket(socket: impl Into<String>, timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            timeout,
        }
    }

    async fn tmux(&self, args: &[&str]) -> Result<ToolOutput> {
        let mut full = vec!["-L", self.socket.as_str()];
        full.extend_from_slice(args);
        run_tool("tmux", "tmux", &full, None, self.timeout).await
    }

    /// Fail unless tmux is installed and at least `MIN_TMUX_VERSION`.
    pub async fn check_available(&self) -> Result<()> {
        let out = run_tool("tmux", "tmux", &["-V"], None, self.timeout)
            .await?
            .into_result("tmux", &["-V"])?;
        let version = out.trim();
        let (major, minor) = parse_tmux_version(version).ok_or_else(|| Error::ExternalTool {
            tool: "tmux",
            message: format!("cannot parse tmux version from: {version}"),
            timed_out: false,
        })?;
        if (major, minor) < MIN_TMUX_VERSION {
            return Err(Error::ExternalTool {
                tool: "tmux",
                message: format!(
                    "tmux {major}.{minor} is too old; threadbox requires >= {}.{}",
                    MIN_TMUX_VERSION.0, MIN_TMUX_VERSION.1
                ),
                timed_out: false,
            });
        }
        debug!("tmux version: {version}");
        Ok(())
    }
}

#[async_trait]
impl TerminalSessionService for TmuxSessions {
    async fn is_alive(&self, name: &str) -> Result<bool> {
        let target = session_target(name);
        let args = ["has-session", "-t", target.as_str()];
        let out = self.tmux(&args).await?;
        if out.success {
            return Ok(true);
        }
        if out.stderr.trim().is_empty() || is_missing_session(&out.stderr) {
            return Ok(false);
        }
        out.into_result("tmux", &args).map(|_| false)
    }

    async fn ensure_session(&self, launch: &SessionLaunch) -> Result<Ensured> {
        if self.is_alive(&launch.name).await? {
            return Ok(Ensured::Existing);
        }

        let args = new_session_args(launch);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.tmux(&arg_refs).await?;
        if !out.success && out.stderr.contains("duplicate session") {
            debug!(session = %launch.name, "session appeared concurrently, attaching");
            return Ok(Ensured::Existing);
        }
        out.into_result("tmux", &["new-session", launch.name.as_str()])?;
        debug!(session = %launch.name, dir = %launch.working_dir.display(), "tmux session created");
        Ok(Ensured::Created)
    }

    async fn kill(&self, name: &str) -> Result<()> {
        let target = session_target(name);
        let args = ["kill-session", "-t", target.as_str()];
        let out = self.tmux(&args).await?;
        if out.success || is_missing_session(&out.stderr) {
            return Ok(());
        }
        out.into_result("tmux", &args).map(|_| ())
    }

    async fn rename(&self, old: &str, new: &str) -> Result<bool> {
        let target = session_target(old);
        let args = ["rename-session", "-t", target.as_str(), new];
        let out = self.tmux(&args).await?;
        if out.success {
            return Ok(true);
        }
        if is_missing_session(&out.stderr) {
            return Ok(false);
        }
        out.into_result("tmux", &args).map(|_| false)
    }

    async fn capture(&self, name: &str) -> Result<Option<String>> {
        let target = pane_target(name);
        let args = ["capture-pane", "-p", "-t", target.as_str()];
        let out = self.tmux(&args).await?;
        if out.success {
            return Ok(Some(out.stdout));
        }
        if is_missing_session(&out.stderr) {
            return Ok(None);
        }
        out.into_result("tmux", &args).map(Some)
    }

    async fn send_input(&self, name: &str, text: &str) -> Result<bool> {
        let target = pane_target(name);
        let literal = ["send-keys", "-t", target.as_str(), "-l", text];
        let enter = ["send-keys", "-t", target.as_str(), "Enter"];
        for args in [&literal[..], &enter[..]] {
            let out = self.tmux(args).await?;
            if !out.success {
                if is_missing_session(&out.stderr) {
                    return Ok(false);
                }
                out.into_result("tmux", args)?;
            }
        }
        Ok(true)
    }
}

/// Exact-match session target (`=name`), so `app-a` never resolves to `app-ab`.
fn session_target(name: &str) -> String {
    format!("={name}")
}

/// Active pane of an exact-match session.
fn pane_target(name: &str) -> String {
    format!("={name}:")
}

fn is_missing_session(stderr: &str) -> bool {
    MISSING_SESSION_MARKERS.iter().any(|m| stderr.contains(m))
}

fn new_session_args(launch: &SessionLaunch) -> Vec<String> {
    let mut args = vec![
        "new-session".to_string(),
        "-d".to_string(),
        "-s".to_string(),
        launch.name.clone(),
        "-c".to_string(),
        launch.working_dir.display().to_string(),
    ];
    for (key, value) in &launch.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    if let Some(command) = &launch.command {
        args.push(command.clone());
    }
    args
}

/// Parse "tmux X.Y" or "tmux X.Ya" (e.g. "tmux 3.4", "tmux 3.3a", "tmux next-3.5").
fn parse_tmux_version(output: &str) -> Option<(u32, u32)> {
    let version = output.strip_prefix("tmux ").unwrap_or(output);
    let version = version.strip_prefix("next-").unwrap_or(version);
    let (major, rest) = version.split_once('.')?;
    let major = major.parse().ok()?;
    let minor: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    Some((major, minor.parse().ok()?))
}
