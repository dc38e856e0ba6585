//! Short thread titles derived from a first prompt.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::process::run_tool;

/// Words kept by the fallback title.
const FALLBACK_WORDS: usize = 4;

/// Longest title accepted from an external command.
const MAX_TITLE_CHARS: usize = 60;

#[async_trait]
pub trait TitleGenerator: Send + Sync {
    /// `None` when no usable title can be derived.
    async fn generate(&self, prompt: &str) -> Option<String>;
}

/// First few words of the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstWordsTitle;

impl FirstWordsTitle {
    fn title(prompt: &str) -> Option<String> {
        let words: Vec<&str> = prompt
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .take(FALLBACK_WORDS)
            .collect();
        (!words.is_empty()).then(|| words.join(" ").to_lowercase())
    }
}

#[async_trait]
impl TitleGenerator for FirstWordsTitle {
    async fn generate(&self, prompt: &str) -> Option<String> {
        Self::title(prompt)
    }
}

/// Runs a user-configured command with the prompt as its last argument and
/// takes the first non-empty output line. Falls back to `FirstWordsTitle`.
#[derive(Debug, Clone)]
pub struct CommandTitle {
    command: String,
    timeout: Duration,
}

impl CommandTitle {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TitleGenerator for CommandTitle {
    async fn generate(&self, prompt: &str) -> Option<String> {
        let script = format!("{} \"$1\"", self.command);
        let args = ["-c", script.as_str(), "threadbox-title", prompt];
        match run_tool("title", "sh", &args, None, self.timeout).await {
            Ok(out) if out.success => {
                if let Some(title) = first_line(&out.stdout) {
                    debug!(title, "generated thread title");
                    return Some(title);
                }
            }
            Ok(out) => warn!("title command failed: {}", out.stderr.trim()),
            Err(e) => warn!("title command failed: {e}"),
        }
        FirstWordsTitle::title(prompt)
    }
}

fn first_line(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_matches(|c| c == '"' || c == '\'');
    Some(line.chars().take(MAX_TITLE_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_words_of_prompt() {
        let title = FirstWordsTitle
            .generate("Fix the login bug, then add tests for it")
            .await;
        assert_eq!(title.as_deref(), Some("fix the login bug"));
    }

    #[tokio::test]
    async fn punctuation_only_prompt_has_no_title() {
        assert_eq!(FirstWordsTitle.generate("?!  ...").await, None);
    }

    #[tokio::test]
    async fn command_output_becomes_title() {
        let titles = CommandTitle::new(
            "printf '\\n  \"Login fix\"\\nignored\\n' #",
            Duration::from_secs(5),
        );
        assert_eq!(
            titles.generate("whatever").await.as_deref(),
            Some("Login fix")
        );
    }

    #[tokio::test]
    async fn command_receives_prompt_as_argument() {
        let titles = CommandTitle::new("echo", Duration::from_secs(5));
        assert_eq!(
            titles.generate("add dark mode").await.as_deref(),
            Some("add dark mode")
        );
    }

    #[tokio::test]
    async fn failing_command_falls_back_to_first_words() {
        let titles = CommandTitle::new("exit 1 #", Duration::from_secs(5));
        assert_eq!(
            titles.generate("Refactor parser errors").await.as_deref(),
            Some("refactor parser errors")
        );
    }
}
