//! Background loops: the dead-session sweep and the agent sampler.

use std::collections::BTreeSet;
use std::time::Instant;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{EngineState, ThreadOrchestrator};
use crate::agent::Transition;
use crate::error::{Error, Result};
use crate::events::OrchestratorEvent;
use crate::thread::ThreadId;

/// Consecutive failures for one session before `SessionUnhealthy` is emitted.
pub const FAILURE_ESCALATION_THRESHOLD: u32 = 3;

/// Extra liveness probes after a timeout within one sweep.
const TRANSIENT_RETRIES: u32 = 2;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub recreated: Vec<String>,
    /// Threads whose worktree directory is gone.
    pub skipped_threads: Vec<ThreadId>,
    pub failures: usize,
}

enum Probe {
    Alive,
    Dead,
    Failed(Error),
}

/// Which status set changed for a thread during one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StatusChange {
    Busy,
    Waiting,
    Completion,
}

impl ThreadOrchestrator {
    /// Check every declared session once, recreate dead ones (resuming
    /// agents that support it) and refresh each thread's dirty flag.
    pub async fn sweep_once(&self) -> SweepReport {
        let snapshot = self.snapshot();
        let mut report = SweepReport::default();

        for thread in &snapshot.threads {
            if !thread.worktree_path.is_dir() {
                warn!(
                    thread_id = %thread.id,
                    path = %thread.worktree_path.display(),
                    "worktree is missing, not recreating sessions"
                );
                report.skipped_threads.push(thread.id);
                continue;
            }

            let dirty = match self.inner.services.git.is_clean(&thread.worktree_path).await {
                Ok(clean) => Some(!clean),
                Err(e) => {
                    debug!(thread_id = %thread.id, "dirty check failed: {e}");
                    None
                }
            };

            let mut probes = Vec::with_capacity(thread.tabs.len());
            for session in thread.session_names() {
                let probe = match self.probe(session).await {
                    Ok(true) => Probe::Alive,
                    Ok(false) => Probe::Dead,
                    Err(e) => Probe::Failed(e),
                };
                probes.push((session.to_string(), probe));
            }

            let mut state = self.inner.state.lock().await;
            let mut recreated = Vec::new();
            let mut changed = false;
            for (session, probe) in probes {
                let outcome = match probe {
                    Probe::Alive => Ok(false),
                    Probe::Dead => {
                        self.recreate_locked(&mut state, thread.id, &session, true)
                            .await
                    }
                    Probe::Failed(e) => Err(e),
                };
                match outcome {
                    Ok(was_recreated) => {
                        state.failure_streaks.remove(&session);
                        if was_recreated {
                            recreated.push(session);
                        }
                    }
                    // The thread or tab went away since the snapshot.
                    Err(Error::NotFound { .. }) => {}
                    Err(e) => {
                        report.failures += 1;
                        self.record_failure(&mut state, thread.id, &session, &e);
                    }
                }
            }

            if let (Some(dirty), Ok(current)) = (dirty, state.thread_mut(thread.id)) {
                if current.dirty != dirty {
                    current.dirty = dirty;
                    changed = true;
                }
            }
            if changed || !recreated.is_empty() {
                self.commit(&state);
            }
            drop(state);

            if !recreated.is_empty() {
                info!(thread_id = %thread.id, sessions = ?recreated, "recreated dead sessions");
                report.recreated.extend(recreated.iter().cloned());
                self.emit(OrchestratorEvent::SessionsRecreated {
                    thread_id: thread.id,
                    sessions: recreated,
                });
            }
        }
        report
    }

    /// Liveness check that retries timeouts a couple of times.
    async fn probe(&self, session: &str) -> Result<bool> {
        let mut attempt = 0;
        loop {
            match self.inner.services.terminals.is_alive(session).await {
                Err(e) if e.is_transient() && attempt < TRANSIENT_RETRIES => {
                    attempt += 1;
                    debug!(session, attempt, "liveness probe timed out, retrying");
                }
                result => return result,
            }
        }
    }

    fn record_failure(
        &self,
        state: &mut EngineState,
        thread_id: ThreadId,
        session: &str,
        error: &Error,
    ) {
        let streak = state.failure_streaks.entry(session.to_string()).or_insert(0);
        *streak += 1;
        warn!(
            thread_id = %thread_id,
            session,
            failures = *streak,
            "session check failed: {error}"
        );
        if *streak == FAILURE_ESCALATION_THRESHOLD {
            self.emit(OrchestratorEvent::SessionUnhealthy {
                thread_id,
                session: session.to_string(),
                failures: *streak,
                error: error.to_string(),
            });
        }
    }

    /// Capture every agent tab once and feed the detector.
    pub async fn sample_once(&self) {
        let snapshot = self.snapshot();
        let mut captures = Vec::new();
        for thread in &snapshot.threads {
            for tab in thread.tabs.iter().filter(|t| t.kind.is_agent()) {
                match self.inner.services.terminals.capture(&tab.session_name).await {
                    Ok(Some(text)) => captures.push((thread.id, tab.session_name.clone(), text)),
                    // Dead sessions are the sweep's business.
                    Ok(None) => {}
                    Err(e) => debug!(session = %tab.session_name, "capture failed: {e}"),
                }
            }
        }
        if captures.is_empty() {
            return;
        }

        let now = Instant::now();
        let mut state = self.inner.state.lock().await;
        let mut changes = BTreeSet::new();
        for (thread_id, session, text) in captures {
            let EngineState {
                threads,
                detector,
                focused_session,
                ..
            } = &mut *state;
            let Some(thread) = threads.iter_mut().find(|t| t.id == thread_id) else {
                continue;
            };
            let Some(agent) = thread
                .tab(&session)
                .filter(|tab| tab.kind.is_agent())
                .map(|tab| thread.tab_agent_type(tab))
            else {
                continue;
            };

            let focused = focused_session.as_deref() == Some(session.as_str());
            let matcher = self.matcher(agent);
            let debounce = self.profile(agent).debounce();
            let Some(transition) =
                detector.observe(&session, &text, matcher.as_ref(), debounce, focused, now)
            else {
                continue;
            };
            debug!(
                thread_id = %thread_id,
                session = %session,
                ?transition,
                "agent state changed"
            );

            let (busy, waiting) = match transition {
                Transition::BecameBusy => (true, false),
                Transition::BecameWaiting => (false, true),
                Transition::Completed { .. } | Transition::BecameIdle => (false, false),
            };
            if set_membership(&mut thread.busy_sessions, &session, busy) {
                changes.insert((thread_id, StatusChange::Busy));
            }
            if set_membership(&mut thread.waiting_sessions, &session, waiting) {
                changes.insert((thread_id, StatusChange::Waiting));
            }
            if let Transition::Completed { unread: true } = transition {
                thread.unread_sessions.insert(session);
                changes.insert((thread_id, StatusChange::Completion));
            }
        }
        if changes.is_empty() {
            return;
        }

        self.commit(&state);
        for (thread_id, change) in changes {
            let Ok(thread) = state.thread(thread_id) else {
                continue;
            };
            let sessions = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>();
            self.emit(match change {
                StatusChange::Busy => OrchestratorEvent::AgentBusy {
                    thread_id,
                    busy_sessions: sessions(&thread.busy_sessions),
                },
                StatusChange::Waiting => OrchestratorEvent::AgentWaiting {
                    thread_id,
                    waiting_sessions: sessions(&thread.waiting_sessions),
                },
                StatusChange::Completion => OrchestratorEvent::AgentCompletion {
                    thread_id,
                    unread_sessions: sessions(&thread.unread_sessions),
                },
            });
        }
    }

    pub(super) async fn sweep_loop(self) {
        let period = self.inner.settings.sweep_interval();
        self.run_every(period, "sweep", |this| async move {
            let report = this.sweep_once().await;
            if report.failures > 0 {
                debug!(failures = report.failures, "sweep finished with failures");
            }
        })
        .await;
    }

    pub(super) async fn sample_loop(self) {
        let period = self.inner.settings.sample_interval();
        self.run_every(period, "sampler", |this| async move { this.sample_once().await })
            .await;
    }

    async fn run_every<F, Fut>(self, period: Duration, name: &'static str, mut tick: F)
    where
        F: FnMut(ThreadOrchestrator) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        debug!(loop_name = name, ?period, "background loop started");
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => tick(self.clone()).await,
            }
        }
        debug!(loop_name = name, "background loop stopped");
    }
}

/// Add or remove `session`, returning whether membership changed.
fn set_membership(set: &mut BTreeSet<String>, session: &str, member: bool) -> bool {
    if member {
        set.insert(session.to_string())
    } else {
        set.remove(session)
    }
}
