use regex::Regex;

use super::AgentProfile;

/// What a captured screen says about the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// A confirmation prompt is on screen.
    Waiting,
    /// A progress indicator is on screen.
    Busy,
    None,
}

/// Classifies captured terminal text for one agent type.
///
/// The detector state machine only sees `Marker` values, so marker rules
/// can change without touching it.
pub trait MarkerMatcher: Send + Sync {
    fn classify(&self, capture: &str) -> Marker;
}

/// Matcher driven by the busy/waiting regexes of an `AgentProfile`.
/// The default matcher has no patterns and never matches.
#[derive(Debug, Clone, Default)]
pub struct RegexMatcher {
    busy: Option<Regex>,
    waiting: Option<Regex>,
}

impl RegexMatcher {
    pub fn new(busy: Option<&str>, waiting: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            busy: busy.map(Regex::new).transpose()?,
            waiting: waiting.map(Regex::new).transpose()?,
        })
    }

    pub fn from_profile(profile: &AgentProfile) -> Result<Self, regex::Error> {
        Self::new(
            profile.busy_marker.as_deref(),
            profile.waiting_marker.as_deref(),
        )
    }
}

impl MarkerMatcher for RegexMatcher {
    fn classify(&self, capture: &str) -> Marker {
        if self.waiting.as_ref().is_some_and(|re| re.is_match(capture)) {
            Marker::Waiting
        } else if self.busy.as_ref().is_some_and(|re| re.is_match(capture)) {
            Marker::Busy
        } else {
            Marker::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentType;

    fn claude() -> RegexMatcher {
        RegexMatcher::from_profile(&AgentProfile::builtin(AgentType::Claude)).unwrap()
    }

    #[test]
    fn claude_spinner_is_busy() {
        let screen = "✻ Pondering… (12s · ↑ 1.2k tokens · esc to interrupt)\n>";
        assert_eq!(claude().classify(screen), Marker::Busy);
    }

    #[test]
    fn claude_permission_prompt_is_waiting() {
        let screen = "Bash command\n  rm -rf target\nDo you want to proceed?\n❯ 1. Yes\n  2. No";
        assert_eq!(claude().classify(screen), Marker::Waiting);
    }

    #[test]
    fn waiting_wins_over_busy() {
        let screen = "esc to interrupt\nDo you want to proceed?";
        assert_eq!(claude().classify(screen), Marker::Waiting);
    }

    #[test]
    fn plain_prompt_has_no_marker() {
        assert_eq!(claude().classify("> \n? for shortcuts"), Marker::None);
    }

    #[test]
    fn matcher_without_patterns_never_matches() {
        let matcher = RegexMatcher::new(None, None).unwrap();
        assert_eq!(matcher.classify("esc to interrupt"), Marker::None);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(RegexMatcher::new(Some("(unclosed"), None).is_err());
    }
}
