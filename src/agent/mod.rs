//! Coding-agent CLIs that run inside agent tabs, and how to tell what they are doing.

pub mod detector;
pub mod matcher;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use detector::{AgentActivity, AgentStateDetector, Transition};
pub use matcher::{Marker, MarkerMatcher, RegexMatcher};

/// Agent CLIs threadbox knows how to launch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    #[default]
    Claude,
    Codex,
    Gemini,
}

impl AgentType {
    pub const ALL: [AgentType; 3] = [Self::Claude, Self::Codex, Self::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown agent type: {s}"))
    }
}

/// How to launch one agent type and how to read its screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Program started in a fresh agent tab.
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Typed into a recreated agent tab to pick up the previous conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_command: Option<String>,
    /// Regex matched against captured output while the agent is working.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_marker: Option<String>,
    /// Regex matched against captured output while the agent awaits confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_marker: Option<String>,
    /// How long output must stay unchanged before a busy agent counts as done.
    pub debounce_ms: u64,
}

impl AgentProfile {
    /// Built-in profile for an agent type.
    pub fn builtin(agent: AgentType) -> Self {
        match agent {
            AgentType::Claude => Self {
                command: "claude".to_string(),
                args: Vec::new(),
                resume_command: Some("claude --continue".to_string()),
                busy_marker: Some(r"(?i)esc to interrupt".to_string()),
                waiting_marker: Some(
                    r"Do you want to (proceed|allow|make this edit|create)|❯ 1\. Yes".to_string(),
                ),
                debounce_ms: 2_000,
            },
            AgentType::Codex => Self {
                command: "codex".to_string(),
                args: Vec::new(),
                resume_command: Some("codex resume --last".to_string()),
                busy_marker: Some(r"(?i)esc to interrupt".to_string()),
                waiting_marker: Some(r"(?i)allow command\?|would you like to run".to_string()),
                debounce_ms: 2_500,
            },
            AgentType::Gemini => Self {
                command: "gemini".to_string(),
                args: Vec::new(),
                resume_command: None,
                busy_marker: Some(r"(?i)esc to cancel".to_string()),
                waiting_marker: Some(r"(?i)allow execution|apply this change\?".to_string()),
                debounce_ms: 3_000,
            },
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn supports_resume(&self) -> bool {
        self.resume_command.is_some()
    }

    /// Shell command line that starts the agent, optionally with a first prompt.
    pub fn startup_command(&self, initial_prompt: Option<&str>) -> String {
        let mut parts = vec![self.command.clone()];
        parts.extend(self.args.iter().map(|a| shell_escape(a)));
        if let Some(prompt) = initial_prompt.filter(|p| !p.trim().is_empty()) {
            parts.push(shell_escape(prompt));
        }
        parts.join(" ")
    }
}

/// Shell-escape a string for safe inclusion in a command line.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ','))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}
