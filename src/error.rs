use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the orchestration engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied input is unacceptable (duplicate name, unknown project, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A thread, tab or project id no longer resolves.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// git or tmux exited non-zero, failed to start, or timed out.
    #[error("{tool} failed: {message}")]
    ExternalTool {
        tool: &'static str,
        message: String,
        timed_out: bool,
    },

    /// The worktree target directory already exists.
    #[error("path already exists: {}", .0.display())]
    PathExists(PathBuf),

    /// The branch to create already exists.
    #[error("branch already exists: {0}")]
    BranchExists(String),

    /// The requested base branch does not resolve.
    #[error("base branch not found: {0}")]
    BaseBranchMissing(String),

    /// The operation would violate a naming or ordering invariant.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// Archive preconditions are unmet; carries one reason per unmet check.
    #[error("confirmation required: {}", .0.join(", "))]
    ConfirmationRequired(Vec<String>),

    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Another process owns the state file.
    #[error("{} is in use by another threadbox process", .0.display())]
    StateLocked(PathBuf),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExternalTool { timed_out: true, .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_required_lists_reasons() {
        let err = Error::ConfirmationRequired(vec![
            "uncommitted changes".to_string(),
            "not merged into main".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "confirmation required: uncommitted changes, not merged into main"
        );
    }

    #[test]
    fn only_timeouts_are_transient() {
        let timeout = Error::ExternalTool {
            tool: "git",
            message: "timed out".to_string(),
            timed_out: true,
        };
        let failure = Error::ExternalTool {
            tool: "git",
            message: "fatal".to_string(),
            timed_out: false,
        };
        assert!(timeout.is_transient());
        assert!(!failure.is_transient());
        assert!(!Error::Validation("x".into()).is_transient());
    }

    #[test]
    fn not_found_display() {
        let err = Error::not_found("thread", "abc");
        assert_eq!(err.to_string(), "thread not found: abc");
    }
}
