//! Threadbox: agent threads on git worktrees, each tab a tmux session.

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod git;
pub mod naming;
pub mod orchestrator;
pub mod paths;
pub mod process;
pub mod project;
pub mod storage;
pub mod terminal;
pub mod thread;

pub use error::{Error, Result};
pub use orchestrator::ThreadOrchestrator;
