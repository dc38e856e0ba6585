//! Agent activity inferred from periodic screen captures.
//!
//! Each agent tab is `Idle`, `Busy` or `WaitingForInput`. Submitted input
//! makes a tab busy immediately; samples move it between states based on
//! the matcher's verdict and how long the screen has been unchanged. A busy
//! tab that goes quiet while unfocused gets a sticky unread-completion flag.
//!
//! Every method takes `now` so tests can script time.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use super::matcher::{Marker, MarkerMatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentActivity {
    #[default]
    Idle,
    Busy,
    WaitingForInput,
}

impl fmt::Display for AgentActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Busy => write!(f, "Busy"),
            Self::WaitingForInput => write!(f, "Waiting"),
        }
    }
}

/// A state change worth telling the rest of the system about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecameBusy,
    BecameWaiting,
    /// Busy → idle after the debounce window. `unread` is set when the tab
    /// wasn't focused.
    Completed { unread: bool },
    /// Waiting → idle without a busy phase in between.
    BecameIdle,
}

#[derive(Debug, Clone)]
struct SessionActivity {
    state: AgentActivity,
    unread_completion: bool,
    last_hash: Option<u64>,
    last_change: Instant,
}

impl SessionActivity {
    fn new(now: Instant) -> Self {
        Self {
            state: AgentActivity::Idle,
            unread_completion: false,
            last_hash: None,
            last_change: now,
        }
    }
}

#[derive(Debug, Default)]
pub struct AgentStateDetector {
    sessions: HashMap<String, SessionActivity>,
}

impl AgentStateDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, session: &str) -> AgentActivity {
        self.sessions
            .get(session)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    pub fn has_unread_completion(&self, session: &str) -> bool {
        self.sessions
            .get(session)
            .is_some_and(|s| s.unread_completion)
    }

    /// The user submitted a line to the tab: busy right away.
    pub fn input_submitted(&mut self, session: &str, now: Instant) -> Option<Transition> {
        let entry = self
            .sessions
            .entry(session.to_string())
            .or_insert_with(|| SessionActivity::new(now));
        entry.last_change = now;
        let previous = std::mem::replace(&mut entry.state, AgentActivity::Busy);
        (previous != AgentActivity::Busy).then_some(Transition::BecameBusy)
    }

    /// Feed one capture of the tab's screen.
    pub fn observe(
        &mut self,
        session: &str,
        capture: &str,
        matcher: &dyn MarkerMatcher,
        debounce: Duration,
        focused: bool,
        now: Instant,
    ) -> Option<Transition> {
        let entry = self
            .sessions
            .entry(session.to_string())
            .or_insert_with(|| SessionActivity::new(now));

        let hash = hash_capture(capture);
        let changed = entry.last_hash != Some(hash);
        if changed {
            entry.last_hash = Some(hash);
            entry.last_change = now;
        }
        let quiet_for = now.saturating_duration_since(entry.last_change);

        let previous = entry.state;
        let next = match matcher.classify(capture) {
            Marker::Waiting => AgentActivity::WaitingForInput,
            Marker::Busy => AgentActivity::Busy,
            Marker::None => match previous {
                AgentActivity::Busy if quiet_for >= debounce => AgentActivity::Idle,
                AgentActivity::Busy => AgentActivity::Busy,
                AgentActivity::WaitingForInput if changed => AgentActivity::Busy,
                AgentActivity::WaitingForInput | AgentActivity::Idle => AgentActivity::Idle,
            },
        };

        if next == previous {
            return None;
        }
        entry.state = next;

        Some(match (previous, next) {
            (_, AgentActivity::Busy) => Transition::BecameBusy,
            (_, AgentActivity::WaitingForInput) => Transition::BecameWaiting,
            (AgentActivity::Busy, AgentActivity::Idle) => {
                let unread = !focused;
                if unread {
                    entry.unread_completion = true;
                }
                Transition::Completed { unread }
            }
            (_, AgentActivity::Idle) => Transition::BecameIdle,
        })
    }

    /// The tab was focused: clear its unread-completion flag.
    pub fn mark_seen(&mut self, session: &str) {
        if let Some(entry) = self.sessions.get_mut(session) {
            entry.unread_completion = false;
        }
    }

    pub fn forget(&mut self, session: &str) {
        self.sessions.remove(session);
    }

    /// Carry a tab's state over to its new session name.
    pub fn rename(&mut self, old: &str, new: &str) {
        if let Some(entry) = self.sessions.remove(old) {
            self.sessions.insert(new.to_string(), entry);
        }
    }
}

fn hash_capture(capture: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    capture.hash(&mut hasher);
    hasher.finish()
}
