//! Named terminal sessions that tabs run in.

pub mod tmux;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;

pub use tmux::TmuxSessions;

/// Everything needed to start a session from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLaunch {
    pub name: String,
    pub working_dir: PathBuf,
    /// Shell command line to run; `None` starts the default shell.
    pub command: Option<String>,
    /// Exported into the session's environment.
    pub env: Vec<(String, String)>,
}

/// Result of `ensure_session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    /// A live session already had this name.
    Existing,
    Created,
}

/// Session manager operations.
///
/// Every call that targets a session treats the session vanishing as
/// "not found" (`false`, `None`, no-op), never as an error.
#[async_trait]
pub trait TerminalSessionService: Send + Sync {
    async fn is_alive(&self, name: &str) -> Result<bool>;

    /// Attach to a live session of this name or start a detached one.
    async fn ensure_session(&self, launch: &SessionLaunch) -> Result<Ensured>;

    /// Kill a session. Killing a session that doesn't exist succeeds.
    async fn kill(&self, name: &str) -> Result<()>;

    /// Rename a live session. Returns `false` if it doesn't exist.
    async fn rename(&self, old: &str, new: &str) -> Result<bool>;

    /// Visible pane contents, `None` if the session is gone.
    async fn capture(&self, name: &str) -> Result<Option<String>>;

    /// Type `text` followed by Enter. Returns `false` if the session is gone.
    async fn send_input(&self, name: &str, text: &str) -> Result<bool>;
}
