//! Tab operations and per-session status flags.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::{EngineState, Startup, ThreadOrchestrator};
use crate::agent::AgentType;
use crate::error::{Error, Result};
use crate::events::OrchestratorEvent;
use crate::naming;
use crate::thread::{Tab, TabKind, Thread, ThreadId};

impl ThreadOrchestrator {
    /// Add a tab under the next free tab slug and start its session.
    ///
    /// An initial prompt is passed to the agent on its command line and marks
    /// the tab busy straight away.
    pub async fn add_tab(
        &self,
        thread_id: ThreadId,
        use_agent_command: bool,
        requested_agent: Option<AgentType>,
        initial_prompt: Option<String>,
    ) -> Result<Tab> {
        let initial_prompt = initial_prompt.filter(|p| !p.trim().is_empty());
        let mut state = self.inner.state.lock().await;
        let thread = state.thread(thread_id)?.clone();
        let project = state.project(thread.project_id)?.clone();

        let kind = if use_agent_command {
            TabKind::Agent
        } else {
            TabKind::Shell
        };
        let tab_slug = naming::next_tab_slug(kind.is_agent(), &thread.tab_slugs());
        let session = naming::build_session_name(&project.slug, thread.slug.as_deref(), &tab_slug);
        if state.session_taken(&session) {
            return Err(Error::Consistency(format!(
                "session name {session} is already in use"
            )));
        }

        let mut tab = Tab::new(session.clone(), kind);
        if kind.is_agent() {
            tab.agent_type = requested_agent.filter(|a| *a != thread.agent_type);
        }
        let prompt = initial_prompt.as_deref().filter(|_| kind.is_agent());
        let (launch, _) = self.session_launch(
            &project,
            &thread,
            &tab,
            Startup::Fresh {
                initial_prompt: prompt,
            },
        );
        self.inner.services.terminals.ensure_session(&launch).await?;

        let EngineState {
            threads, detector, ..
        } = &mut *state;
        let updated = threads
            .iter_mut()
            .find(|t| t.id == thread_id)
            .ok_or_else(|| Error::not_found("thread", thread_id))?;
        updated.push_tab(tab.clone());
        updated.last_selected_session = Some(session.clone());
        if prompt.is_some() {
            detector.input_submitted(&session, Instant::now());
            updated.busy_sessions.insert(session.clone());
        }
        let busy = busy_event(updated);
        let auto_rename = prompt.is_some() && !updated.auto_named;
        self.commit(&state);
        info!(thread_id = %thread_id, session = %session, %kind, "added tab");

        if prompt.is_some() {
            self.emit(busy);
        }
        drop(state);
        if let (true, Some(prompt)) = (auto_rename, initial_prompt) {
            self.spawn_auto_rename(thread_id, session, prompt);
        }
        Ok(tab)
    }

    /// Kill a tab's session, then drop the tab. If the kill fails the tab stays.
    pub async fn remove_tab(&self, thread_id: ThreadId, session: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let thread = state.thread(thread_id)?;
        let index = thread
            .tab_index(session)
            .ok_or_else(|| Error::not_found("tab", session))?;
        if self.inner.settings.protect_main_tab && thread.is_main && index == 0 {
            return Err(Error::Consistency(
                "the first tab of a main thread can't be removed".to_string(),
            ));
        }

        self.inner.services.terminals.kill(session).await?;

        state.thread_mut(thread_id)?.remove_tab(session);
        state.forget_session(session);
        self.commit(&state);
        info!(thread_id = %thread_id, session, "removed tab");
        Ok(())
    }

    /// Set a tab's display name; `None` or blank restores the default.
    pub async fn rename_tab(
        &self,
        thread_id: ThreadId,
        session: &str,
        name: Option<String>,
    ) -> Result<()> {
        self.update_thread(thread_id, |thread| {
            let tab = thread
                .tab_mut(session)
                .ok_or_else(|| Error::not_found("tab", session))?;
            tab.custom_name = name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty());
            Ok(())
        })
        .await
    }

    /// Returns whether the tab is pinned afterwards.
    pub async fn toggle_pin(&self, thread_id: ThreadId, session: &str) -> Result<bool> {
        self.update_thread(thread_id, |thread| thread.toggle_pin(session))
            .await
    }

    pub async fn reorder_tabs(&self, thread_id: ThreadId, order: &[String]) -> Result<()> {
        self.update_thread(thread_id, |thread| thread.reorder_tabs(order))
            .await
    }

    /// Make `pinned` the exact pinned prefix, in that order.
    pub async fn update_pinned_tabs(
        &self,
        thread_id: ThreadId,
        pinned: &[String],
    ) -> Result<()> {
        self.update_thread(thread_id, |thread| thread.set_pinned_tabs(pinned))
            .await
    }

    pub async fn mark_session_completion_seen(
        &self,
        thread_id: ThreadId,
        session: &str,
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let thread = state.thread_mut(thread_id)?;
        if !thread.has_session(session) {
            return Err(Error::not_found("tab", session));
        }
        thread.unread_sessions.remove(session);
        state.detector.mark_seen(session);
        self.commit(&state);
        Ok(())
    }

    pub async fn mark_session_waiting_seen(
        &self,
        thread_id: ThreadId,
        session: &str,
    ) -> Result<()> {
        self.update_thread(thread_id, |thread| {
            if !thread.has_session(session) {
                return Err(Error::not_found("tab", session));
            }
            thread.waiting_sessions.remove(session);
            Ok(())
        })
        .await
    }

    /// Mark an agent tab busy, as if input had just been submitted.
    pub async fn mark_session_busy(&self, thread_id: ThreadId, session: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let events = mark_busy(&mut state, thread_id, session)?;
        self.publish(&state, events);
        Ok(())
    }

    /// Focus a tab: remember it as the thread's selection and clear its
    /// unread and waiting flags. Agent activity is left alone.
    pub async fn select_session(&self, thread_id: ThreadId, session: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let thread = state.thread_mut(thread_id)?;
        if !thread.has_session(session) {
            return Err(Error::not_found("tab", session));
        }
        thread.last_selected_session = Some(session.to_string());
        thread.unread_sessions.remove(session);
        thread.waiting_sessions.remove(session);
        state.detector.mark_seen(session);
        state.focused_session = Some(session.to_string());
        self.commit(&state);
        Ok(())
    }

    /// Type a line into a tab. Agent tabs become busy, and a thread's first
    /// prompt kicks off the auto rename in the background.
    pub async fn submit_input(&self, thread_id: ThreadId, session: &str, text: &str) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let thread = state.thread(thread_id)?;
        let tab = thread
            .tab(session)
            .ok_or_else(|| Error::not_found("tab", session))?;
        let is_agent = tab.kind.is_agent();
        let auto_rename = is_agent && !thread.auto_named && !text.trim().is_empty();

        if !self.inner.services.terminals.send_input(session, text).await? {
            return Err(Error::not_found("session", session));
        }
        if !is_agent {
            return Ok(());
        }

        let events = mark_busy(&mut state, thread_id, session)?;
        self.publish(&state, events);
        drop(state);
        if auto_rename {
            self.spawn_auto_rename(thread_id, session.to_string(), text.to_string());
        }
        Ok(())
    }

    /// Start a dead tab's session again, under the same name and in the
    /// thread's current worktree. With `then_resume`, resumable agents are
    /// told to pick up their previous conversation. Returns `false` if the
    /// session was alive.
    pub async fn recreate_session_if_needed(
        &self,
        thread_id: ThreadId,
        session: &str,
        then_resume: bool,
    ) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        let recreated = self
            .recreate_locked(&mut state, thread_id, session, then_resume)
            .await?;
        if recreated {
            self.commit(&state);
            self.emit(OrchestratorEvent::SessionsRecreated {
                thread_id,
                sessions: vec![session.to_string()],
            });
        }
        Ok(recreated)
    }

    pub(super) async fn recreate_locked(
        &self,
        state: &mut EngineState,
        thread_id: ThreadId,
        session: &str,
        then_resume: bool,
    ) -> Result<bool> {
        let thread = state.thread(thread_id)?.clone();
        let tab = thread
            .tab(session)
            .ok_or_else(|| Error::not_found("tab", session))?
            .clone();
        let project = state.project(thread.project_id)?.clone();
        let terminals = &self.inner.services.terminals;

        if terminals.is_alive(session).await? {
            return Ok(false);
        }
        if !thread.worktree_path.is_dir() {
            return Err(Error::Consistency(format!(
                "worktree {} for session {session} is missing",
                thread.worktree_path.display()
            )));
        }

        let startup = if then_resume {
            Startup::Resume
        } else {
            Startup::Fresh {
                initial_prompt: None,
            }
        };
        let (launch, pending_input) = self.session_launch(&project, &thread, &tab, startup);
        terminals.ensure_session(&launch).await?;
        if let Some(input) = pending_input {
            if !terminals.send_input(session, &input).await? {
                warn!(session, "session died before the resume command was sent");
            }
        }

        state.detector.forget(session);
        let thread = state.thread_mut(thread_id)?;
        thread.busy_sessions.remove(session);
        thread.waiting_sessions.remove(session);
        info!(thread_id = %thread_id, session, resumed = then_resume, "recreated session");
        Ok(true)
    }

    /// Run the auto rename as a task `shutdown` waits for.
    pub(super) fn spawn_auto_rename(&self, thread_id: ThreadId, session: String, prompt: String) {
        let this = self.clone();
        self.inner.tasks.spawn(async move {
            match this
                .auto_rename_thread_after_first_prompt_if_needed(thread_id, &session, &prompt)
                .await
            {
                Ok(renamed) => debug!(thread_id = %thread_id, renamed, "auto rename finished"),
                Err(e) => warn!(thread_id = %thread_id, "auto rename failed: {e}"),
            }
        });
    }

    /// Commit and announce status changes, if there are any.
    fn publish(&self, state: &EngineState, events: Vec<OrchestratorEvent>) {
        if events.is_empty() {
            return;
        }
        self.commit(state);
        for event in events {
            self.emit(event);
        }
    }

    /// Apply a model-only change to one thread and commit it.
    async fn update_thread<T>(
        &self,
        thread_id: ThreadId,
        change: impl FnOnce(&mut Thread) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.inner.state.lock().await;
        let value = change(state.thread_mut(thread_id)?)?;
        self.commit(&state);
        Ok(value)
    }
}

/// Events for whichever status sets actually changed.
fn mark_busy(
    state: &mut EngineState,
    thread_id: ThreadId,
    session: &str,
) -> Result<Vec<OrchestratorEvent>> {
    let EngineState {
        threads, detector, ..
    } = state;
    let thread = threads
        .iter_mut()
        .find(|t| t.id == thread_id)
        .ok_or_else(|| Error::not_found("thread", thread_id))?;
    if !thread.has_session(session) {
        return Err(Error::not_found("tab", session));
    }
    detector.input_submitted(session, Instant::now());
    let mut events = Vec::new();
    if thread.waiting_sessions.remove(session) {
        events.push(OrchestratorEvent::AgentWaiting {
            thread_id,
            waiting_sessions: thread.waiting_sessions.iter().cloned().collect(),
        });
    }
    if thread.busy_sessions.insert(session.to_string()) {
        events.push(busy_event(thread));
    }
    Ok(events)
}

fn busy_event(thread: &Thread) -> OrchestratorEvent {
    OrchestratorEvent::AgentBusy {
        thread_id: thread.id,
        busy_sessions: thread.busy_sessions.iter().cloned().collect(),
    }
}
