//! Thread lifecycle: create, rename, archive, delete.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::{EngineState, Startup, ThreadOrchestrator};
use crate::agent::AgentType;
use crate::error::{Error, Result};
use crate::naming;
use crate::project::{Project, ProjectId};
use crate::thread::{Tab, TabKind, Thread, ThreadId};

/// Result of `archive_thread`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Archived,
    /// Nothing was changed; archiving needs explicit confirmation because of these reasons.
    ConfirmationRequired(Vec<String>),
}

impl ArchiveOutcome {
    /// `Error::ConfirmationRequired` for callers that treat it as a failure.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Archived => Ok(()),
            Self::ConfirmationRequired(reasons) => Err(Error::ConfirmationRequired(reasons)),
        }
    }
}

/// A completed rename step and how to undo it.
enum Undo {
    Worktree { from: PathBuf, to: PathBuf },
    Branch { old: String, new: String },
    Session { old: String, new: String },
}

impl ThreadOrchestrator {
    /// Create a worktree thread with a generated name and start its first tab.
    ///
    /// If the session can't be started the worktree and branch are removed
    /// again, so a failed call leaves nothing behind.
    pub async fn create_thread(
        &self,
        project_id: ProjectId,
        requested_agent: Option<AgentType>,
        use_agent_command: bool,
    ) -> Result<Thread> {
        let branches = {
            let project = self.inner.state.lock().await.project(project_id)?.clone();
            self.branches_of(&project).await?
        };
        let mut state = self.inner.state.lock().await;
        let project = state.project(project_id)?.clone();
        let agent_type = requested_agent.unwrap_or_else(|| self.agent_type_for(&project));
        let slug = {
            let mut rng = rand::thread_rng();
            naming::generate_thread_name(&mut rng, |s| {
                state.thread_slug_taken(&project, s, None, &branches)
            })
        };
        let worktree_path = project.worktree_path_for(&slug);
        let git = &self.inner.services.git;

        git.create_worktree(
            &project.repo_path,
            &slug,
            &worktree_path,
            project.default_branch.as_deref(),
        )
        .await?;

        let mut thread = Thread::new(
            project.id,
            slug.clone(),
            Some(slug.clone()),
            worktree_path.clone(),
            slug.clone(),
            agent_type,
        );
        let kind = if use_agent_command {
            TabKind::Agent
        } else {
            TabKind::Shell
        };
        let tab_slug = naming::next_tab_slug(kind.is_agent(), &[]);
        let tab = Tab::new(
            naming::build_session_name(&project.slug, Some(&slug), &tab_slug),
            kind,
        );

        let (launch, _) = self.session_launch(
            &project,
            &thread,
            &tab,
            Startup::Fresh {
                initial_prompt: None,
            },
        );
        if let Err(e) = self.inner.services.terminals.ensure_session(&launch).await {
            warn!(thread = %slug, "session start failed, rolling back worktree: {e}");
            if let Err(undo) = git.remove_worktree(&project.repo_path, &worktree_path).await {
                warn!(
                    path = %worktree_path.display(),
                    "rollback: failed to remove worktree: {undo}"
                );
            }
            if let Err(undo) = git.delete_branch(&project.repo_path, &slug).await {
                warn!(branch = %slug, "rollback: failed to delete branch: {undo}");
            }
            return Err(e);
        }

        thread.last_selected_session = Some(tab.session_name.clone());
        thread.push_tab(tab);
        state.threads.push(thread.clone());
        self.commit(&state);
        info!(
            thread_id = %thread.id,
            name = %thread.name,
            project = %project.slug,
            "created thread"
        );
        Ok(thread)
    }

    /// Create the thread bound to the project's own checkout.
    pub async fn create_main_thread(&self, project_id: ProjectId) -> Result<Thread> {
        let mut state = self.inner.state.lock().await;
        let project = state.project(project_id)?.clone();
        if state
            .threads
            .iter()
            .any(|t| t.project_id == project_id && t.is_main)
        {
            return Err(Error::Validation(format!(
                "{} already has a main thread",
                project.name
            )));
        }

        let branch = self
            .inner
            .services
            .git
            .current_branch(&project.repo_path)
            .await?
            .unwrap_or_else(|| "HEAD".to_string());
        let mut thread = Thread::new(
            project.id,
            project.name.clone(),
            None,
            project.repo_path.clone(),
            branch,
            self.agent_type_for(&project),
        );
        let tab = Tab::new(
            naming::build_session_name(&project.slug, None, naming::MAIN_TAB_SLUG),
            TabKind::Agent,
        );
        let (launch, _) = self.session_launch(
            &project,
            &thread,
            &tab,
            Startup::Fresh {
                initial_prompt: None,
            },
        );
        self.inner.services.terminals.ensure_session(&launch).await?;

        thread.last_selected_session = Some(tab.session_name.clone());
        thread.push_tab(tab);
        state.threads.push(thread.clone());
        self.commit(&state);
        info!(thread_id = %thread.id, project = %project.slug, "created main thread");
        Ok(thread)
    }

    /// Rename a thread. For worktree threads this moves the worktree,
    /// renames the branch and renames every session; any failure undoes
    /// the completed steps and leaves the thread as it was.
    pub async fn rename_thread(&self, thread_id: ThreadId, name: &str) -> Result<Thread> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("thread name can't be empty".to_string()));
        }
        let branches = {
            let state = self.inner.state.lock().await;
            let project = state.project(state.thread(thread_id)?.project_id)?.clone();
            drop(state);
            self.branches_of(&project).await?
        };
        let mut state = self.inner.state.lock().await;
        let thread = state.thread(thread_id)?;
        let project = state.project(thread.project_id)?.clone();
        let slug = naming::slugify(name);
        if !thread.is_main
            && thread.slug.as_deref() != Some(slug.as_str())
            && state.thread_slug_taken(&project, &slug, Some(thread_id), &branches)
        {
            return Err(Error::Validation(format!(
                "a thread named {slug} already exists in {}",
                project.name
            )));
        }
        self.rename_locked(&mut state, thread_id, name, slug).await
    }

    /// On the first prompt submitted to a thread, derive a title for it and
    /// rename the thread. Returns whether a rename happened.
    ///
    /// The thread counts as auto named only once a rename succeeds, so a
    /// failed attempt is retried on the next prompt. At most one attempt per
    /// thread runs at a time.
    pub async fn auto_rename_thread_after_first_prompt_if_needed(
        &self,
        thread_id: ThreadId,
        session: &str,
        prompt: &str,
    ) -> Result<bool> {
        {
            let mut state = self.inner.state.lock().await;
            let thread = state.thread(thread_id)?;
            let eligible = !thread.auto_named && thread.has_session(session);
            if !eligible || !state.auto_renaming.insert(thread_id) {
                return Ok(false);
            }
        }
        let result = self.auto_rename(thread_id, prompt).await;
        self.inner.state.lock().await.auto_renaming.remove(&thread_id);
        result
    }

    async fn auto_rename(&self, thread_id: ThreadId, prompt: &str) -> Result<bool> {
        // Title generation may run an external command; don't hold the lock.
        let Some(title) = self.inner.services.titles.generate(prompt).await else {
            return Ok(false);
        };
        let branches = {
            let state = self.inner.state.lock().await;
            let Ok(thread) = state.thread(thread_id) else {
                debug!(%thread_id, "thread went away before auto rename");
                return Ok(false);
            };
            let project = state.project(thread.project_id)?.clone();
            drop(state);
            self.branches_of(&project).await?
        };

        let mut state = self.inner.state.lock().await;
        let Ok(thread) = state.thread(thread_id) else {
            debug!(%thread_id, "thread went away before auto rename");
            return Ok(false);
        };
        if thread.auto_named {
            return Ok(false);
        }
        let project = state.project(thread.project_id)?.clone();
        let base = naming::slugify(&title);
        if thread.slug.as_deref() == Some(base.as_str()) {
            state.thread_mut(thread_id)?.auto_named = true;
            self.commit(&state);
            return Ok(false);
        }
        let slug = naming::unique_slug(&base, |s| {
            state.thread_slug_taken(&project, s, Some(thread_id), &branches)
        });
        self.rename_locked(&mut state, thread_id, &title, slug).await?;
        Ok(true)
    }

    async fn rename_locked(
        &self,
        state: &mut EngineState,
        thread_id: ThreadId,
        name: &str,
        slug: String,
    ) -> Result<Thread> {
        let thread = state.thread(thread_id)?.clone();
        let project = state.project(thread.project_id)?.clone();

        if thread.is_main || thread.slug.as_deref() == Some(slug.as_str()) {
            let thread = state.thread_mut(thread_id)?;
            thread.name = name.to_string();
            thread.auto_named = true;
            let thread = thread.clone();
            self.commit(state);
            return Ok(thread);
        }

        let new_path = project.worktree_path_for(&slug);
        let renames: Vec<(String, String)> = thread
            .tabs
            .iter()
            .map(|tab| {
                let tab_slug =
                    naming::tab_slug_of(&tab.session_name).unwrap_or(naming::MAIN_TAB_SLUG);
                (
                    tab.session_name.clone(),
                    naming::build_session_name(&project.slug, Some(&slug), tab_slug),
                )
            })
            .collect();

        let mut done = Vec::new();
        if let Err(e) = self
            .apply_rename_steps(&project, &thread, &new_path, &slug, &renames, &mut done)
            .await
        {
            warn!(thread_id = %thread_id, "rename failed, undoing {} step(s): {e}", done.len());
            self.undo_rename_steps(&project, done).await;
            return Err(e);
        }

        state.rename_sessions(&renames);
        let updated = state.thread_mut(thread_id)?;
        updated.name = name.to_string();
        updated.slug = Some(slug.clone());
        updated.worktree_path = new_path;
        updated.branch_name = slug;
        updated.auto_named = true;
        updated.apply_session_renames(&renames);
        let updated = updated.clone();
        self.commit(state);
        info!(thread_id = %thread_id, name = %updated.name, "renamed thread");
        Ok(updated)
    }

    async fn apply_rename_steps(
        &self,
        project: &Project,
        thread: &Thread,
        new_path: &std::path::Path,
        new_branch: &str,
        renames: &[(String, String)],
        done: &mut Vec<Undo>,
    ) -> Result<()> {
        let git = &self.inner.services.git;
        git.move_worktree(&project.repo_path, &thread.worktree_path, new_path)
            .await?;
        done.push(Undo::Worktree {
            from: thread.worktree_path.clone(),
            to: new_path.to_path_buf(),
        });

        git.rename_branch(&project.repo_path, &thread.branch_name, new_branch)
            .await?;
        done.push(Undo::Branch {
            old: thread.branch_name.clone(),
            new: new_branch.to_string(),
        });

        for (old, new) in renames {
            // A dead session has nothing to rename; it is recreated under the new name.
            if self.inner.services.terminals.rename(old, new).await? {
                done.push(Undo::Session {
                    old: old.clone(),
                    new: new.clone(),
                });
            }
        }
        Ok(())
    }

    async fn undo_rename_steps(&self, project: &Project, done: Vec<Undo>) {
        let git = &self.inner.services.git;
        let terminals = &self.inner.services.terminals;
        for step in done.into_iter().rev() {
            let result = match &step {
                Undo::Session { old, new } => terminals.rename(new, old).await.map(|_| ()),
                Undo::Branch { old, new } => git.rename_branch(&project.repo_path, new, old).await,
                Undo::Worktree { from, to } => {
                    git.move_worktree(&project.repo_path, to, from).await
                }
            };
            if let Err(e) = result {
                warn!("rename rollback step failed: {e}");
            }
        }
    }

    /// Archive a thread: kill its sessions and remove its worktree, keeping
    /// the branch. Unless `confirmed`, an unclean or unmerged worktree yields
    /// `ConfirmationRequired` and nothing changes.
    pub async fn archive_thread(
        &self,
        thread_id: ThreadId,
        confirmed: bool,
    ) -> Result<ArchiveOutcome> {
        let mut state = self.inner.state.lock().await;
        let thread = state.thread(thread_id)?.clone();
        let project = state.project(thread.project_id)?.clone();

        if !confirmed && !thread.is_main && thread.worktree_path.is_dir() {
            let reasons = self.archive_blockers(&project, &thread).await?;
            if !reasons.is_empty() {
                debug!(thread_id = %thread_id, ?reasons, "archive needs confirmation");
                return Ok(ArchiveOutcome::ConfirmationRequired(reasons));
            }
        }

        self.teardown(&mut state, &project, &thread).await?;
        self.commit(&state);
        info!(thread_id = %thread_id, branch = %thread.branch_name, "archived thread");
        Ok(ArchiveOutcome::Archived)
    }

    async fn archive_blockers(&self, project: &Project, thread: &Thread) -> Result<Vec<String>> {
        let git = &self.inner.services.git;
        let mut reasons = Vec::new();
        if !git.is_clean(&thread.worktree_path).await? {
            reasons.push("uncommitted changes".to_string());
        }
        let base = self.base_branch_for(project).await;
        if !git.is_merged_into(&thread.worktree_path, &base).await? {
            reasons.push(format!("not merged into {base}"));
        }
        Ok(reasons)
    }

    /// Delete a thread: kill its sessions, remove its worktree and delete its
    /// branch. No confirmation is asked for.
    ///
    /// The thread record is gone once the worktree is; a failure to delete
    /// the branch afterwards is still returned.
    pub async fn delete_thread(&self, thread_id: ThreadId) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let thread = state.thread(thread_id)?.clone();
        let project = state.project(thread.project_id)?.clone();
        self.teardown(&mut state, &project, &thread).await?;
        self.commit(&state);
        info!(thread_id = %thread_id, "deleted thread");

        if thread.is_main {
            return Ok(());
        }
        self.inner
            .services
            .git
            .delete_branch(&project.repo_path, &thread.branch_name)
            .await
    }

    /// Kill every session, remove the worktree (never the main checkout) and
    /// drop the record. Stops at the first failure with the record intact.
    async fn teardown(
        &self,
        state: &mut EngineState,
        project: &Project,
        thread: &Thread,
    ) -> Result<()> {
        for session in thread.session_names() {
            self.inner.services.terminals.kill(session).await?;
        }
        if !thread.is_main {
            self.inner
                .services
                .git
                .remove_worktree(&project.repo_path, &thread.worktree_path)
                .await?;
        }
        state.remove_thread(thread.id);
        Ok(())
    }

    /// Move a thread into a section, or out of all sections with `None`.
    pub async fn move_thread(&self, thread_id: ThreadId, section: Option<String>) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state.thread_mut(thread_id)?.section_id = section.filter(|s| !s.is_empty());
        self.commit(&state);
        Ok(())
    }

    pub async fn set_thread_pinned(&self, thread_id: ThreadId, pinned: bool) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state.thread_mut(thread_id)?.pinned = pinned;
        self.commit(&state);
        Ok(())
    }
}
