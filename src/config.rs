//! User settings from `~/.config/threadbox/config.toml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::{AgentProfile, AgentType};

const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5_000;
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1_000;
const DEFAULT_TOOL_TIMEOUT_MS: u64 = 15_000;

/// Loops faster than this would hammer tmux.
const MIN_INTERVAL_MS: u64 = 100;

/// Per-agent overrides layered on top of the built-in profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Empty string disables resuming.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busy_marker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_marker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_agent_type: AgentType,
    pub sweep_interval_ms: u64,
    pub sample_interval_ms: u64,
    /// Upper bound on any single git or tmux invocation.
    pub tool_timeout_ms: u64,
    /// Root for project worktree directories; defaults to the data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktrees_base: Option<PathBuf>,
    /// Refuse to remove the first tab of a main thread.
    pub protect_main_tab: bool,
    /// Command that turns a first prompt (passed as its last argument) into a short thread title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_command: Option<String>,
    /// Keyed by agent type name (`claude`, `codex`, `gemini`).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub agents: BTreeMap<String, AgentOverride>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_agent_type: AgentType::default(),
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            worktrees_base: None,
            protect_main_tab: true,
            title_command: None,
            agents: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(MIN_INTERVAL_MS))
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(MIN_INTERVAL_MS))
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms.max(MIN_INTERVAL_MS))
    }

    /// Effective profile: the built-in one with any configured overrides applied.
    pub fn profile(&self, agent: AgentType) -> AgentProfile {
        let mut profile = AgentProfile::builtin(agent);
        let Some(o) = self.agents.get(agent.as_str()) else {
            return profile;
        };
        if let Some(command) = &o.command {
            profile.command = command.clone();
        }
        if let Some(args) = &o.args {
            profile.args = args.clone();
        }
        if let Some(resume) = &o.resume_command {
            profile.resume_command = (!resume.trim().is_empty()).then(|| resume.clone());
        }
        if let Some(busy) = &o.busy_marker {
            profile.busy_marker = Some(busy.clone());
        }
        if let Some(waiting) = &o.waiting_marker {
            profile.waiting_marker = Some(waiting.clone());
        }
        if let Some(ms) = o.debounce_ms {
            profile.debounce_ms = ms;
        }
        profile
    }

    /// Directory project worktree roots are created under.
    pub fn worktrees_root(&self) -> PathBuf {
        self.worktrees_base
            .clone()
            .or_else(crate::paths::worktrees_directory)
            .unwrap_or_else(|| PathBuf::from(".threadbox-worktrees"))
    }

    /// Problems that don't stop loading but that the user should hear about.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for key in self.agents.keys() {
            if key.parse::<AgentType>().is_err() {
                warnings.push(format!("unknown agent type in [agents.{key}]"));
            }
        }
        for agent in AgentType::ALL {
            if let Err(e) = crate::agent::RegexMatcher::from_profile(&self.profile(agent)) {
                warnings.push(format!("invalid marker for {agent}: {e}"));
            }
        }
        warnings
    }
}

/// Load settings from the default config path.
/// Returns defaults if the file doesn't exist or can't be parsed.
pub fn load_settings() -> Settings {
    match crate::paths::config_file() {
        Some(path) => load_settings_from(&path),
        None => Settings::default(),
    }
}

pub fn load_settings_from(path: &Path) -> Settings {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Settings::default(),
    };

    match toml::from_str::<Settings>(&contents) {
        Ok(settings) => {
            for w in settings.warnings() {
                warn!("{}: {w}", path.display());
            }
            settings
        }
        Err(e) => {
            warn!("Failed to parse config at {}: {e}", path.display());
            Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.protect_main_tab);
    }

    #[test]
    fn parses_scalars() {
        let settings: Settings = toml::from_str(
            r#"
default_agent_type = "codex"
sweep_interval_ms = 2000
protect_main_tab = false
title_command = "llm -m small"
"#,
        )
        .unwrap();
        assert_eq!(settings.default_agent_type, AgentType::Codex);
        assert_eq!(settings.sweep_interval(), Duration::from_secs(2));
        assert_eq!(settings.sample_interval_ms, DEFAULT_SAMPLE_INTERVAL_MS);
        assert!(!settings.protect_main_tab);
        assert_eq!(settings.title_command.as_deref(), Some("llm -m small"));
    }

    #[test]
    fn agent_override_merges_onto_builtin() {
        let settings: Settings = toml::from_str(
            r#"
[agents.claude]
debounce_ms = 4500
args = ["--model", "opus"]
"#,
        )
        .unwrap();
        let profile = settings.profile(AgentType::Claude);
        assert_eq!(profile.debounce_ms, 4500);
        assert_eq!(profile.args, vec!["--model", "opus"]);
        assert_eq!(profile.command, "claude");
        assert!(profile.supports_resume());
        assert_eq!(
            settings.profile(AgentType::Codex),
            AgentProfile::builtin(AgentType::Codex)
        );
    }

    #[test]
    fn empty_resume_command_disables_resume() {
        let settings: Settings =
            toml::from_str("[agents.codex]\nresume_command = \"\"\n").unwrap();
        assert!(!settings.profile(AgentType::Codex).supports_resume());
    }

    #[test]
    fn intervals_are_clamped() {
        let settings = Settings {
            sample_interval_ms: 0,
            ..Settings::default()
        };
        assert_eq!(
            settings.sample_interval(),
            Duration::from_millis(MIN_INTERVAL_MS)
        );
    }

    #[test]
    fn warns_about_unknown_agents_and_bad_regex() {
        let settings: Settings = toml::from_str(
            r#"
[agents.vim]
command = "vim"

[agents.gemini]
busy_marker = "(oops"
"#,
        )
        .unwrap();
        let warnings = settings.warnings();
        assert_eq!(warnings.len(), 2, "{warnings:?}");
    }

    #[test]
    fn load_from_missing_file_is_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = load_settings_from(&dir.path().join("nope.toml"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn load_from_invalid_file_falls_back_to_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "sweep_interval_ms = \"fast\"").unwrap();
        assert_eq!(load_settings_from(&path), Settings::default());
    }

    #[test]
    fn explicit_worktrees_base_wins() {
        let settings = Settings {
            worktrees_base: Some(PathBuf::from("/data/wt")),
            ..Settings::default()
        };
        assert_eq!(settings.worktrees_root(), PathBuf::from("/data/wt"));
    }
}
