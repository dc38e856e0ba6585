//! The thread/tab/session engine.
//!
//! `ThreadOrchestrator` owns every project and thread. Each mutation holds
//! the state lock from validation through its git/tmux calls to the commit,
//! so mutations never interleave. A commit publishes a new `Snapshot` for
//! readers, queues the model for the persister and emits `ThreadsUpdated`.
//!
//! Two background loops run once `start` is called: the sweep recreates dead
//! sessions and refreshes dirty flags, and the sampler feeds screen captures
//! to the agent state detector. Both work from a snapshot and re-validate
//! under the lock before changing anything. Auto renames run as tracked
//! tasks; `shutdown` waits for them before the final write.
//!
//! An orchestrator opened on a state file owns it through a `StateLock`
//! until `shutdown`.

mod lifecycle;
mod monitor;
mod tabs;
pub mod title;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::agent::{AgentProfile, AgentStateDetector, AgentType, MarkerMatcher, RegexMatcher};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::events::{OrchestratorEvent, EVENT_CHANNEL_CAPACITY};
use crate::git::{GitCli, GitWorktreeService, FALLBACK_DEFAULT_BRANCH};
use crate::naming;
use crate::project::{Project, ProjectId};
use crate::storage::{self, PersistedModel, Persister, StateLock, SCHEMA_VERSION};
use crate::terminal::{SessionLaunch, TerminalSessionService, TmuxSessions};
use crate::thread::{Tab, Thread, ThreadId};

pub use lifecycle::ArchiveOutcome;
pub use monitor::{SweepReport, FAILURE_ESCALATION_THRESHOLD};
pub use title::{CommandTitle, FirstWordsTitle, TitleGenerator};

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct Services {
    pub git: Arc<dyn GitWorktreeService>,
    pub terminals: Arc<dyn TerminalSessionService>,
    pub titles: Arc<dyn TitleGenerator>,
    /// Replaces the regex matcher built from settings for an agent type.
    pub matchers: HashMap<AgentType, Arc<dyn MarkerMatcher>>,
}

impl Services {
    /// git CLI, tmux, and the configured title command.
    pub fn system(settings: &Settings) -> Self {
        let timeout = settings.tool_timeout();
        let titles: Arc<dyn TitleGenerator> = match &settings.title_command {
            Some(command) => Arc::new(CommandTitle::new(command.clone(), timeout)),
            None => Arc::new(FirstWordsTitle),
        };
        Self {
            git: Arc::new(GitCli::new(timeout)),
            terminals: Arc::new(TmuxSessions::new(timeout)),
            titles,
            matchers: HashMap::new(),
        }
    }
}

/// Point-in-time copy of the model for readers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub projects: Vec<Project>,
    pub threads: Vec<Thread>,
}

impl Snapshot {
    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn threads_of(&self, project_id: ProjectId) -> impl Iterator<Item = &Thread> {
        self.threads.iter().filter(move |t| t.project_id == project_id)
    }
}

/// Everything guarded by the writer lock.
struct EngineState {
    projects: Vec<Project>,
    threads: Vec<Thread>,
    detector: AgentStateDetector,
    /// Consecutive probe or recreation failures per session.
    failure_streaks: HashMap<String, u32>,
    focused_session: Option<String>,
    /// Threads with an auto rename in flight.
    auto_renaming: HashSet<ThreadId>,
}

impl EngineState {
    fn new(model: PersistedModel) -> Self {
        Self {
            projects: model.projects,
            threads: model.threads,
            detector: AgentStateDetector::new(),
            failure_streaks: HashMap::new(),
            focused_session: None,
            auto_renaming: HashSet::new(),
        }
    }

    fn project(&self, id: ProjectId) -> Result<&Project> {
        self.projects
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::not_found("project", id))
    }

    fn project_mut(&mut self, id: ProjectId) -> Result<&mut Project> {
        self.projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::not_found("project", id))
    }

    fn thread(&self, id: ThreadId) -> Result<&Thread> {
        self.threads
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::not_found("thread", id))
    }

    fn thread_mut(&mut self, id: ThreadId) -> Result<&mut Thread> {
        self.threads
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::not_found("thread", id))
    }

    fn session_taken(&self, name: &str) -> bool {
        self.threads.iter().any(|t| t.has_session(name))
    }

    /// A thread slug is taken if another thread of the project uses it, a
    /// branch or worktree directory of that name exists, or a session already
    /// has a name it would build.
    fn thread_slug_taken(
        &self,
        project: &Project,
        slug: &str,
        except: Option<ThreadId>,
        branches: &BTreeSet<String>,
    ) -> bool {
        let prefix = naming::build_session_name(&project.slug, Some(slug), "");
        let others = || self.threads.iter().filter(move |t| Some(t.id) != except);
        others().any(|t| t.project_id == project.id && t.slug.as_deref() == Some(slug))
            || branches.contains(slug)
            || project.worktree_path_for(slug).exists()
            || others().flat_map(|t| t.session_names()).any(|name| {
                name.strip_prefix(prefix.as_str())
                    .is_some_and(|tab| !tab.contains('-'))
            })
    }

    fn project_slug_taken(&self, slug: &str) -> bool {
        let prefix = format!("{}-{slug}-", naming::SESSION_PREFIX);
        self.projects.iter().any(|p| p.slug == slug)
            || self
                .threads
                .iter()
                .flat_map(|t| t.session_names())
                .any(|name| name.starts_with(&prefix))
    }

    /// Drop all per-session bookkeeping outside the thread record.
    fn forget_session(&mut self, name: &str) {
        self.detector.forget(name);
        self.failure_streaks.remove(name);
        if self.focused_session.as_deref() == Some(name) {
            self.focused_session = None;
        }
    }

    fn rename_sessions(&mut self, renames: &[(String, String)]) {
        for (old, new) in renames {
            self.detector.rename(old, new);
            if let Some(streak) = self.failure_streaks.remove(old) {
                self.failure_streaks.insert(new.clone(), streak);
            }
            if self.focused_session.as_deref() == Some(old.as_str()) {
                self.focused_session = Some(new.clone());
            }
        }
    }

    fn remove_thread(&mut self, id: ThreadId) -> Option<Thread> {
        let index = self.threads.iter().position(|t| t.id == id)?;
        let thread = self.threads.remove(index);
        for name in thread.session_names() {
            self.forget_session(name);
        }
        Some(thread)
    }
}

/// How a session's startup command is chosen.
#[derive(Debug, Clone, Copy)]
enum Startup<'a> {
    Fresh { initial_prompt: Option<&'a str> },
    /// Recreating a dead tab: resumable agents start a shell and get the
    /// resume command typed in.
    Resume,
}

struct Inner {
    state: Mutex<EngineState>,
    snapshot: watch::Sender<Arc<Snapshot>>,
    events: broadcast::Sender<OrchestratorEvent>,
    services: Services,
    settings: Settings,
    matchers: HashMap<AgentType, Arc<dyn MarkerMatcher>>,
    persister: Persister,
    /// Released by `shutdown`.
    state_lock: std::sync::Mutex<Option<StateLock>>,
    cancel: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
    tasks: TaskTracker,
}

/// Handle to the engine. Clones share the same state.
#[derive(Clone)]
pub struct ThreadOrchestrator {
    inner: Arc<Inner>,
}

impl ThreadOrchestrator {
    /// An engine over `model` that owns no state file lock.
    pub fn new(
        settings: Settings,
        model: PersistedModel,
        services: Services,
        persister: Persister,
    ) -> Self {
        Self::build(settings, model, services, persister, None)
    }

    fn build(
        settings: Settings,
        model: PersistedModel,
        services: Services,
        persister: Persister,
        state_lock: Option<StateLock>,
    ) -> Self {
        let matchers = build_matchers(&settings, &services);
        let snapshot = Arc::new(Snapshot {
            projects: model.projects.clone(),
            threads: model.threads.clone(),
        });
        let (snapshot_tx, _) = watch::channel(snapshot);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(EngineState::new(model)),
                snapshot: snapshot_tx,
                events,
                services,
                settings,
                matchers,
                persister,
                state_lock: std::sync::Mutex::new(state_lock),
                cancel: CancellationToken::new(),
                loops: Mutex::new(Vec::new()),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Lock and load the model at `state_path` (if any) and persist back to it.
    ///
    /// # Errors
    ///
    /// `Error::StateLocked` while another orchestrator owns the file.
    pub fn open(
        settings: Settings,
        state_path: Option<PathBuf>,
        services: Services,
    ) -> Result<Self> {
        let state_lock = state_path.as_deref().map(StateLock::acquire).transpose()?;
        let model = match &state_path {
            Some(path) => storage::load_model(path)?,
            None => PersistedModel::default(),
        };
        info!(
            projects = model.projects.len(),
            threads = model.threads.len(),
            "loaded model"
        );
        let persister = Persister::spawn(state_path);
        Ok(Self::build(settings, model, services, persister, state_lock))
    }

    /// Reconcile with tmux once, then start the sweep and sampler loops.
    pub async fn start(&self) {
        let report = self.sweep_once().await;
        if !report.recreated.is_empty() {
            info!(count = report.recreated.len(), "recreated sessions at startup");
        }
        let mut loops = self.inner.loops.lock().await;
        if loops.is_empty() {
            loops.push(tokio::spawn(self.clone().sweep_loop()));
            loops.push(tokio::spawn(self.clone().sample_loop()));
        }
    }

    /// Stop the loops, let in-flight auto renames finish, write the latest
    /// model and release the state file.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.cancel.cancel();
        let handles: Vec<_> = self.inner.loops.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("background loop ended abnormally: {e}");
            }
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        let flushed = self.inner.persister.flush().await;
        let state_lock = self
            .inner
            .state_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(state_lock);
        flushed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Write the latest committed model now.
    pub async fn flush(&self) -> Result<()> {
        self.inner.persister.flush().await
    }

    /// Project override, else the configured default.
    pub fn effective_agent_type(&self, project_id: ProjectId) -> Result<AgentType> {
        let snapshot = self.snapshot();
        let project = snapshot
            .project(project_id)
            .ok_or_else(|| Error::not_found("project", project_id))?;
        Ok(self.agent_type_for(project))
    }

    /// Branch a thread is compared against before archiving: the project
    /// override, else the detected default branch.
    pub async fn resolve_base_branch(&self, thread_id: ThreadId) -> Result<String> {
        let snapshot = self.snapshot();
        let thread = snapshot
            .thread(thread_id)
            .ok_or_else(|| Error::not_found("thread", thread_id))?;
        let project = snapshot
            .project(thread.project_id)
            .ok_or_else(|| Error::not_found("project", thread.project_id))?;
        Ok(self.base_branch_for(project).await)
    }

    /// Register a repository.
    pub async fn add_project(&self, repo_path: PathBuf, name: Option<String>) -> Result<Project> {
        let repo_path = std::fs::canonicalize(&repo_path)
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| {
                Error::Validation(format!("{} is not a directory", repo_path.display()))
            })?;

        let mut state = self.inner.state.lock().await;
        if let Some(existing) = state.projects.iter().find(|p| p.repo_path == repo_path) {
            return Err(Error::Validation(format!(
                "{} is already registered as {}",
                repo_path.display(),
                existing.name
            )));
        }
        let worktrees_root = self.inner.settings.worktrees_root();
        let project = Project::new(repo_path, name, &worktrees_root, |s| {
            state.project_slug_taken(s)
        });
        state.projects.push(project.clone());
        self.commit(&state);
        info!(project_id = %project.id, slug = %project.slug, "added project");
        Ok(project)
    }

    /// Set or clear a project's default-branch and agent-type overrides.
    pub async fn configure_project(
        &self,
        project_id: ProjectId,
        default_branch: Option<String>,
        agent_type: Option<AgentType>,
    ) -> Result<Project> {
        let mut state = self.inner.state.lock().await;
        let project = state.project_mut(project_id)?;
        project.default_branch = default_branch.filter(|b| !b.trim().is_empty());
        project.agent_type = agent_type;
        let project = project.clone();
        self.commit(&state);
        Ok(project)
    }

    fn agent_type_for(&self, project: &Project) -> AgentType {
        project
            .agent_type
            .unwrap_or(self.inner.settings.default_agent_type)
    }

    /// Branches of the project's repository, for slug collision checks.
    async fn branches_of(&self, project: &Project) -> Result<BTreeSet<String>> {
        let branches = self
            .inner
            .services
            .git
            .list_branches(&project.repo_path)
            .await?;
        Ok(branches.into_iter().collect())
    }

    async fn base_branch_for(&self, project: &Project) -> String {
        if let Some(branch) = &project.default_branch {
            return branch.clone();
        }
        self.inner
            .services
            .git
            .detect_default_branch(&project.repo_path)
            .await
            .unwrap_or_else(|| FALLBACK_DEFAULT_BRANCH.to_string())
    }

    fn profile(&self, agent: AgentType) -> AgentProfile {
        self.inner.settings.profile(agent)
    }

    fn matcher(&self, agent: AgentType) -> Arc<dyn MarkerMatcher> {
        self.inner
            .matchers
            .get(&agent)
            .cloned()
            .unwrap_or_else(|| Arc::new(RegexMatcher::default()))
    }

    /// Launch parameters for a tab, derived from the thread's current state.
    /// The second value is input to type once the session exists.
    fn session_launch(
        &self,
        project: &Project,
        thread: &Thread,
        tab: &Tab,
        startup: Startup<'_>,
    ) -> (SessionLaunch, Option<String>) {
        let mut env = vec![
            (
                "THREADBOX_PROJECT_PATH".to_string(),
                project.repo_path.display().to_string(),
            ),
            ("THREADBOX_PROJECT_NAME".to_string(), project.name.clone()),
        ];
        if !thread.is_main {
            env.push((
                "THREADBOX_WORKTREE_PATH".to_string(),
                thread.worktree_path.display().to_string(),
            ));
            env.push(("THREADBOX_THREAD_NAME".to_string(), thread.name.clone()));
        }

        let (command, pending_input) = if tab.kind.is_agent() {
            let profile = self.profile(thread.tab_agent_type(tab));
            match (startup, &profile.resume_command) {
                (Startup::Resume, Some(resume)) => (None, Some(resume.clone())),
                (Startup::Resume, None) => (Some(agent_command(&profile, None)), None),
                (Startup::Fresh { initial_prompt }, _) => {
                    (Some(agent_command(&profile, initial_prompt)), None)
                }
            }
        } else {
            (None, None)
        };

        let launch = SessionLaunch {
            name: tab.session_name.clone(),
            working_dir: thread.worktree_path.clone(),
            command,
            env,
        };
        (launch, pending_input)
    }

    /// Publish the committed state to readers, the persister and subscribers.
    fn commit(&self, state: &EngineState) {
        let threads = Arc::new(state.threads.clone());
        self.inner.snapshot.send_replace(Arc::new(Snapshot {
            projects: state.projects.clone(),
            threads: state.threads.clone(),
        }));
        self.inner.persister.persist(PersistedModel {
            version: SCHEMA_VERSION,
            projects: state.projects.clone(),
            threads: state.threads.clone(),
            settings: self.inner.settings.clone(),
        });
        self.emit(OrchestratorEvent::ThreadsUpdated { threads });
    }

    fn emit(&self, event: OrchestratorEvent) {
        if self.inner.events.send(event).is_err() {
            debug!("no event subscribers");
        }
    }
}

/// Agent command that drops to a shell when the agent exits, keeping the tab alive.
fn agent_command(profile: &AgentProfile, initial_prompt: Option<&str>) -> String {
    format!(
        "{}; exec \"${{SHELL:-/bin/sh}}\"",
        profile.startup_command(initial_prompt)
    )
}

fn build_matchers(
    settings: &Settings,
    services: &Services,
) -> HashMap<AgentType, Arc<dyn MarkerMatcher>> {
    AgentType::ALL
        .into_iter()
        .map(|agent| {
            if let Some(custom) = services.matchers.get(&agent) {
                return (agent, custom.clone());
            }
            let matcher = RegexMatcher::from_profile(&settings.profile(agent)).unwrap_or_else(|e| {
                warn!(%agent, "invalid marker pattern, using built-in markers: {e}");
                RegexMatcher::from_profile(&AgentProfile::builtin(agent)).unwrap_or_default()
            });
            (agent, Arc::new(matcher) as Arc<dyn MarkerMatcher>)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::TabKind;

    #[test]
    fn agent_command_falls_back_to_shell() {
        let profile = AgentProfile::builtin(AgentType::Claude);
        assert_eq!(
            agent_command(&profile, Some("hi there")),
            "claude 'hi there'; exec \"${SHELL:-/bin/sh}\""
        );
    }

    #[test]
    fn invalid_configured_marker_falls_back_to_builtin() {
        let mut settings = Settings::default();
        settings.agents.insert(
            "claude".to_string(),
            crate::config::AgentOverride {
                busy_marker: Some("(broken".to_string()),
                ..Default::default()
            },
        );
        let services = Services::system(&settings);
        let matchers = build_matchers(&settings, &services);
        assert_eq!(
            matchers[&AgentType::Claude].classify("esc to interrupt"),
            crate::agent::Marker::Busy
        );
    }

    #[test]
    fn slug_taken_only_by_exact_session_shape() {
        let project = Project::new(
            PathBuf::from("/repos/acme"),
            None,
            std::path::Path::new("/nonexistent/wt"),
            |_| false,
        );
        let mut thread = Thread::new(
            project.id,
            "river-otter".into(),
            Some("river-otter".into()),
            project.worktree_path_for("river-otter"),
            "river-otter".into(),
            AgentType::Claude,
        );
        thread.push_tab(Tab::new("app-acme-river-otter-main".into(), TabKind::Agent));
        let thread_id = thread.id;
        let state = EngineState::new(PersistedModel {
            projects: vec![project.clone()],
            threads: vec![thread],
            ..PersistedModel::default()
        });
        let no_branches = BTreeSet::new();
        assert!(state.thread_slug_taken(&project, "river-otter", None, &no_branches));
        assert!(!state.thread_slug_taken(&project, "river-otter", Some(thread_id), &no_branches));
        assert!(!state.thread_slug_taken(&project, "river", None, &no_branches));
        let archived = BTreeSet::from(["river".to_string()]);
        assert!(state.thread_slug_taken(&project, "river", None, &archived));
        assert!(state.project_slug_taken("acme"));
        assert!(state.project_slug_taken("acme-river"));
        assert!(!state.project_slug_taken("widget"));
    }
}
