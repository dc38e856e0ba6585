use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentType;
use crate::error::{Error, Result};
use crate::naming;
use crate::project::ProjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(Uuid);

impl Default for ThreadId {
    fn default() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ThreadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabKind {
    Agent,
    Shell,
}

impl TabKind {
    pub fn is_agent(self) -> bool {
        self == Self::Agent
    }
}

impl fmt::Display for TabKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent => write!(f, "agent"),
            Self::Shell => write!(f, "shell"),
        }
    }
}

/// One terminal session of a thread. Pinned status comes from its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub session_name: String,
    pub kind: TabKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    /// Agent launched in this tab when it differs from the thread's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,
}

impl Tab {
    pub fn new(session_name: String, kind: TabKind) -> Self {
        Self {
            session_name,
            kind,
            custom_name: None,
            agent_type: None,
        }
    }

    /// Custom name if set, else the tab slug.
    pub fn display_name(&self) -> &str {
        self.custom_name
            .as_deref()
            .or_else(|| naming::tab_slug_of(&self.session_name))
            .unwrap_or(&self.session_name)
    }
}

/// A unit of work bound to a worktree (or, for the main thread, the project checkout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    /// Slug embedded in session names and the worktree directory; `None` for the main thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub project_id: ProjectId,
    pub worktree_path: PathBuf,
    pub branch_name: String,
    pub is_main: bool,
    pub tabs: Vec<Tab>,
    /// Length of the pinned prefix of `tabs`.
    #[serde(default)]
    pub pinned_count: usize,
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub unread_sessions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub waiting_sessions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub busy_sessions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_selected_session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub dirty: bool,
    pub created_at: DateTime<Utc>,
    /// The thread has already been renamed after its first prompt.
    #[serde(default)]
    pub auto_named: bool,
}

impl Thread {
    pub fn new(
        project_id: ProjectId,
        name: String,
        slug: Option<String>,
        worktree_path: PathBuf,
        branch_name: String,
        agent_type: AgentType,
    ) -> Self {
        Self {
            id: ThreadId::default(),
            is_main: slug.is_none(),
            auto_named: slug.is_none(),
            name,
            slug,
            project_id,
            worktree_path,
            branch_name,
            tabs: Vec::new(),
            pinned_count: 0,
            agent_type,
            unread_sessions: BTreeSet::new(),
            waiting_sessions: BTreeSet::new(),
            busy_sessions: BTreeSet::new(),
            last_selected_session: None,
            section_id: None,
            pinned: false,
            dirty: false,
            created_at: Utc::now(),
        }
    }

    /// Agent type a tab runs: its own override, else the thread's.
    pub fn tab_agent_type(&self, tab: &Tab) -> AgentType {
        tab.agent_type.unwrap_or(self.agent_type)
    }

    pub fn tab(&self, session_name: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.session_name == session_name)
    }

    pub fn tab_mut(&mut self, session_name: &str) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| t.session_name == session_name)
    }

    pub fn tab_index(&self, session_name: &str) -> Option<usize> {
        self.tabs.iter().position(|t| t.session_name == session_name)
    }

    pub fn has_session(&self, session_name: &str) -> bool {
        self.tab_index(session_name).is_some()
    }

    pub fn session_names(&self) -> impl Iterator<Item = &str> {
        self.tabs.iter().map(|t| t.session_name.as_str())
    }

    /// Sessions running an agent rather than a plain shell.
    pub fn agent_sessions(&self) -> impl Iterator<Item = &str> {
        self.tabs
            .iter()
            .filter(|t| t.kind.is_agent())
            .map(|t| t.session_name.as_str())
    }

    pub fn pinned_tabs(&self) -> &[Tab] {
        &self.tabs[..self.pinned_count.min(self.tabs.len())]
    }

    pub fn is_pinned(&self, session_name: &str) -> bool {
        self.tab_index(session_name)
            .is_some_and(|i| i < self.pinned_count)
    }

    /// Session name → custom display name, for tabs that have one.
    pub fn custom_tab_names(&self) -> HashMap<&str, &str> {
        self.tabs
            .iter()
            .filter_map(|t| Some((t.session_name.as_str(), t.custom_name.as_deref()?)))
            .collect()
    }

    /// Tab slugs in use, for picking the next one.
    pub fn tab_slugs(&self) -> Vec<&str> {
        self.tabs
            .iter()
            .filter_map(|t| naming::tab_slug_of(&t.session_name))
            .collect()
    }

    pub fn push_tab(&mut self, tab: Tab) {
        self.tabs.push(tab);
    }

    /// Bring a loaded thread back within its invariants: the pinned prefix
    /// fits the tab list and status sets only name existing tabs.
    pub fn normalize(&mut self) {
        self.pinned_count = self.pinned_count.min(self.tabs.len());
        let names: BTreeSet<String> = self.session_names().map(str::to_string).collect();
        for set in [
            &mut self.unread_sessions,
            &mut self.waiting_sessions,
            &mut self.busy_sessions,
        ] {
            set.retain(|name| names.contains(name));
        }
        if self
            .last_selected_session
            .as_ref()
            .is_some_and(|name| !names.contains(name))
        {
            self.last_selected_session = self.tabs.first().map(|t| t.session_name.clone());
        }
    }

    /// Drop a tab and every status that refers to it.
    pub fn remove_tab(&mut self, session_name: &str) -> Option<Tab> {
        let index = self.tab_index(session_name)?;
        let tab = self.tabs.remove(index);
        if index < self.pinned_count {
            self.pinned_count -= 1;
        }
        self.unread_sessions.remove(session_name);
        self.waiting_sessions.remove(session_name);
        self.busy_sessions.remove(session_name);
        if self.last_selected_session.as_deref() == Some(session_name) {
            self.last_selected_session = self.tabs.first().map(|t| t.session_name.clone());
        }
        Some(tab)
    }

    /// Pin an unpinned tab at the end of the pinned prefix, or unpin a pinned
    /// one by moving it just past the remaining pinned tabs. Returns the new
    /// pinned state.
    pub fn toggle_pin(&mut self, session_name: &str) -> Result<bool> {
        let index = self
            .tab_index(session_name)
            .ok_or_else(|| Error::not_found("tab", session_name))?;
        self.pinned_count = self.pinned_count.min(self.tabs.len());
        let tab = self.tabs.remove(index);
        if index < self.pinned_count {
            self.pinned_count -= 1;
            self.tabs.insert(self.pinned_count, tab);
            Ok(false)
        } else {
            self.tabs.insert(self.pinned_count, tab);
            self.pinned_count += 1;
            Ok(true)
        }
    }

    /// Reorder tabs to exactly `order`. Pinned tabs must stay in the prefix.
    pub fn reorder_tabs(&mut self, order: &[String]) -> Result<()> {
        if order.len() != self.tabs.len()
            || order.iter().collect::<BTreeSet<_>>().len() != order.len()
            || !order.iter().all(|name| self.has_session(name))
        {
            return Err(Error::Validation(
                "tab order must list every tab of the thread exactly once".to_string(),
            ));
        }
        let pinned: BTreeSet<&str> = self
            .pinned_tabs()
            .iter()
            .map(|t| t.session_name.as_str())
            .collect();
        let pinned_count = self.pinned_count.min(order.len());
        if !order[..pinned_count]
            .iter()
            .all(|name| pinned.contains(name.as_str()))
        {
            return Err(Error::Consistency(
                "pinned tabs must stay ahead of unpinned tabs".to_string(),
            ));
        }

        let mut by_name: HashMap<String, Tab> = self
            .tabs
            .drain(..)
            .map(|t| (t.session_name.clone(), t))
            .collect();
        self.tabs = order.iter().filter_map(|name| by_name.remove(name)).collect();
        Ok(())
    }

    /// Make `pinned` (in that order) the exact pinned prefix; the remaining
    /// tabs follow in their previous relative order.
    pub fn set_pinned_tabs(&mut self, pinned: &[String]) -> Result<()> {
        if let Some(unknown) = pinned.iter().find(|name| !self.has_session(name)) {
            return Err(Error::not_found("tab", unknown));
        }
        if pinned.iter().collect::<BTreeSet<_>>().len() != pinned.len() {
            return Err(Error::Validation("pinned tabs listed twice".to_string()));
        }

        let mut rest = std::mem::take(&mut self.tabs);
        let mut head = Vec::with_capacity(pinned.len());
        for name in pinned {
            if let Some(i) = rest.iter().position(|t| &t.session_name == name) {
                head.push(rest.remove(i));
            }
        }
        self.pinned_count = head.len();
        head.extend(rest);
        self.tabs = head;
        Ok(())
    }

    /// Rewrite every reference to a renamed session.
    pub fn apply_session_renames(&mut self, renames: &[(String, String)]) {
        let lookup: HashMap<&str, &str> = renames
            .iter()
            .map(|(old, new)| (old.as_str(), new.as_str()))
            .collect();
        let remap = |name: &str| lookup.get(name).copied().unwrap_or(name).to_string();

        for tab in &mut self.tabs {
            tab.session_name = remap(&tab.session_name);
        }
        for set in [
            &mut self.unread_sessions,
            &mut self.waiting_sessions,
            &mut self.busy_sessions,
        ] {
            *set = set.iter().map(|s| remap(s)).collect();
        }
        self.last_selected_session = self.last_selected_session.as_deref().map(remap);
    }
}
