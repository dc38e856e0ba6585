//! In-memory git and tmux stand-ins for orchestrator tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use threadbox::config::Settings;
use threadbox::error::{Error, Result};
use threadbox::git::{GitWorktreeService, Remote};
use threadbox::orchestrator::{FirstWordsTitle, Services, ThreadOrchestrator};
use threadbox::storage::{PersistedModel, Persister};
use threadbox::terminal::{Ensured, SessionLaunch, TerminalSessionService};

fn injected(tool: &'static str, op: &str) -> Error {
    Error::ExternalTool {
        tool,
        message: format!("injected failure: {op}"),
        timed_out: false,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct GitState {
    /// Worktree path → branch checked out there.
    worktrees: BTreeMap<PathBuf, String>,
    branches: BTreeSet<String>,
    dirty: BTreeSet<PathBuf>,
    unmerged: BTreeSet<PathBuf>,
    failing: BTreeSet<String>,
}

/// Tracks worktrees and branches in memory but creates and removes the
/// worktree directories for real, so path checks behave.
#[derive(Default)]
pub struct FakeGit {
    state: Mutex<GitState>,
}

impl FakeGit {
    pub fn new() -> Self {
        let git = Self::default();
        lock(&git.state).branches.insert("main".to_string());
        git
    }

    /// Make every later call of `op` (the trait method name) fail.
    pub fn fail_on(&self, op: &str) {
        lock(&self.state).failing.insert(op.to_string());
    }

    pub fn set_dirty(&self, path: &Path, dirty: bool) {
        let mut state = lock(&self.state);
        if dirty {
            state.dirty.insert(path.to_path_buf());
        } else {
            state.dirty.remove(path);
        }
    }

    pub fn set_unmerged(&self, path: &Path, unmerged: bool) {
        let mut state = lock(&self.state);
        if unmerged {
            state.unmerged.insert(path.to_path_buf());
        } else {
            state.unmerged.remove(path);
        }
    }

    pub fn has_worktree(&self, path: &Path) -> bool {
        lock(&self.state).worktrees.contains_key(path)
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        lock(&self.state).branches.contains(branch)
    }

    /// A branch with no worktree, as archiving leaves behind.
    pub fn add_branch(&self, branch: &str) {
        lock(&self.state).branches.insert(branch.to_string());
    }

    fn check(&self, op: &str) -> Result<MutexGuard<'_, GitState>> {
        let state = lock(&self.state);
        if state.failing.contains(op) {
            return Err(injected("git", op));
        }
        Ok(state)
    }
}

#[async_trait]
impl GitWorktreeService for FakeGit {
    async fn create_worktree(
        &self,
        _repo: &Path,
        branch: &str,
        target: &Path,
        base: Option<&str>,
    ) -> Result<()> {
        let mut state = self.check("create_worktree")?;
        if target.exists() {
            return Err(Error::PathExists(target.to_path_buf()));
        }
        if state.branches.contains(branch) {
            return Err(Error::BranchExists(branch.to_string()));
        }
        if let Some(base) = base.filter(|b| !state.branches.contains(*b)) {
            return Err(Error::BaseBranchMissing(base.to_string()));
        }
        std::fs::create_dir_all(target)?;
        state.branches.insert(branch.to_string());
        state.worktrees.insert(target.to_path_buf(), branch.to_string());
        Ok(())
    }

    async fn remove_worktree(&self, _repo: &Path, path: &Path) -> Result<()> {
        let mut state = self.check("remove_worktree")?;
        state.worktrees.remove(path);
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    async fn move_worktree(&self, _repo: &Path, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.check("move_worktree")?;
        if to.exists() {
            return Err(Error::PathExists(to.to_path_buf()));
        }
        let branch = state
            .worktrees
            .remove(from)
            .ok_or_else(|| injected("git", "move_worktree: not a worktree"))?;
        std::fs::rename(from, to)?;
        state.worktrees.insert(to.to_path_buf(), branch);
        Ok(())
    }

    async fn rename_branch(&self, _repo: &Path, old: &str, new: &str) -> Result<()> {
        let mut state = self.check("rename_branch")?;
        if state.branches.contains(new) {
            return Err(Error::BranchExists(new.to_string()));
        }
        if !state.branches.remove(old) {
            return Err(injected("git", "rename_branch: no such branch"));
        }
        state.branches.insert(new.to_string());
        for branch in state.worktrees.values_mut().filter(|b| b.as_str() == old) {
            *branch = new.to_string();
        }
        Ok(())
    }

    async fn delete_branch(&self, _repo: &Path, branch: &str) -> Result<()> {
        let mut state = self.check("delete_branch")?;
        state.branches.remove(branch);
        Ok(())
    }

    async fn is_clean(&self, path: &Path) -> Result<bool> {
        let state = self.check("is_clean")?;
        Ok(!state.dirty.contains(path))
    }

    async fn is_merged_into(&self, path: &Path, _base: &str) -> Result<bool> {
        let state = self.check("is_merged_into")?;
        Ok(!state.unmerged.contains(path))
    }

    async fn current_branch(&self, _path: &Path) -> Result<Option<String>> {
        self.check("current_branch")?;
        Ok(Some("main".to_string()))
    }

    async fn detect_default_branch(&self, _repo: &Path) -> Option<String> {
        Some("main".to_string())
    }

    async fn list_branches(&self, _repo: &Path) -> Result<Vec<String>> {
        let state = self.check("list_branches")?;
        Ok(state.branches.iter().cloned().collect())
    }

    async fn get_remotes(&self, _repo: &Path) -> Result<Vec<Remote>> {
        self.check("get_remotes")?;
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct FakeSession {
    pub alive: bool,
    pub launch: SessionLaunch,
    pub inputs: Vec<String>,
    pub screen: String,
}

/// Parks one `is_alive` call until released.
#[derive(Clone, Default)]
pub struct LivenessGate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
struct TerminalState {
    sessions: HashMap<String, FakeSession>,
    failing: BTreeSet<String>,
    created: usize,
    held_check: Option<LivenessGate>,
}

/// Sessions that live in a map. Killing one externally marks it dead.
#[derive(Default)]
pub struct FakeTerminals {
    state: Mutex<TerminalState>,
}

impl FakeTerminals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, op: &str) {
        lock(&self.state).failing.insert(op.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failing.clear();
    }

    /// Simulate the session dying outside the engine.
    pub fn kill_externally(&self, name: &str) {
        if let Some(session) = lock(&self.state).sessions.get_mut(name) {
            session.alive = false;
        }
    }

    pub fn set_screen(&self, name: &str, screen: &str) {
        if let Some(session) = lock(&self.state).sessions.get_mut(name) {
            session.screen = screen.to_string();
        }
    }

    pub fn session(&self, name: &str) -> Option<FakeSession> {
        lock(&self.state).sessions.get(name).cloned()
    }

    pub fn alive(&self, name: &str) -> bool {
        self.session(name).is_some_and(|s| s.alive)
    }

    pub fn live_names(&self) -> BTreeSet<String> {
        lock(&self.state)
            .sessions
            .iter()
            .filter(|(_, s)| s.alive)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn inputs(&self, name: &str) -> Vec<String> {
        self.session(name).map(|s| s.inputs).unwrap_or_default()
    }

    pub fn created(&self) -> usize {
        lock(&self.state).created
    }

    /// The next `is_alive` call signals `entered` and then waits for
    /// `release` before answering from the state at that moment.
    pub fn hold_next_liveness_check(&self) -> LivenessGate {
        let gate = LivenessGate::default();
        lock(&self.state).held_check = Some(gate.clone());
        gate
    }

    fn check(&self, op: &str) -> Result<MutexGuard<'_, TerminalState>> {
        let state = lock(&self.state);
        if state.failing.contains(op) {
            return Err(injected("tmux", op));
        }
        Ok(state)
    }
}

#[async_trait]
impl TerminalSessionService for FakeTerminals {
    async fn is_alive(&self, name: &str) -> Result<bool> {
        let held = lock(&self.state).held_check.take();
        if let Some(gate) = held {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let state = self.check("is_alive")?;
        Ok(state.sessions.get(name).is_some_and(|s| s.alive))
    }

    async fn ensure_session(&self, launch: &SessionLaunch) -> Result<Ensured> {
        let mut state = self.check("ensure_session")?;
        if state.sessions.get(&launch.name).is_some_and(|s| s.alive) {
            return Ok(Ensured::Existing);
        }
        state.created += 1;
        state.sessions.insert(
            launch.name.clone(),
            FakeSession {
                alive: true,
                launch: launch.clone(),
                inputs: Vec::new(),
                screen: String::new(),
            },
        );
        Ok(Ensured::Created)
    }

    async fn kill(&self, name: &str) -> Result<()> {
        let mut state = self.check("kill")?;
        state.sessions.remove(name);
        Ok(())
    }

    async fn rename(&self, old: &str, new: &str) -> Result<bool> {
        let mut state = self.check("rename")?;
        match state.sessions.remove(old) {
            Some(session) if session.alive => {
                state.sessions.insert(new.to_string(), session);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn capture(&self, name: &str) -> Result<Option<String>> {
        let state = self.check("capture")?;
        Ok(state
            .sessions
            .get(name)
            .filter(|s| s.alive)
            .map(|s| s.screen.clone()))
    }

    async fn send_input(&self, name: &str, text: &str) -> Result<bool> {
        let mut state = self.check("send_input")?;
        match state.sessions.get_mut(name).filter(|s| s.alive) {
            Some(session) => {
                session.inputs.push(text.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// An orchestrator over fakes with one registered project.
pub struct Harness {
    pub orchestrator: ThreadOrchestrator,
    pub git: Arc<FakeGit>,
    pub terminals: Arc<FakeTerminals>,
    pub project_id: threadbox::project::ProjectId,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(Settings::default()).await
    }

    pub async fn with_settings(mut settings: Settings) -> Self {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("acme");
        std::fs::create_dir_all(&repo).unwrap();
        settings.worktrees_base = Some(dir.path().join("worktrees"));

        let git = Arc::new(FakeGit::new());
        let terminals = Arc::new(FakeTerminals::new());
        let services = Services {
            git: git.clone(),
            terminals: terminals.clone(),
            titles: Arc::new(FirstWordsTitle),
            matchers: HashMap::new(),
        };
        let orchestrator = ThreadOrchestrator::new(
            settings,
            PersistedModel::default(),
            services,
            Persister::spawn(None),
        );
        let project = orchestrator.add_project(repo, None).await.unwrap();
        Self {
            orchestrator,
            git,
            terminals,
            project_id: project.id,
            dir,
        }
    }
}
