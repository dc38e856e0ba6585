//! Repository operations behind threads: worktrees, branches, cleanliness.

pub mod remote;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::process::{run_tool, ToolOutput};

pub use remote::{parse_remotes, Provider, Remote};

/// Branch assumed when nothing better can be detected.
pub const FALLBACK_DEFAULT_BRANCH: &str = "main";

/// Worktree and branch operations the orchestrator relies on.
#[async_trait]
pub trait GitWorktreeService: Send + Sync {
    /// Create `branch` from `base` (or HEAD) and check it out at `target`.
    async fn create_worktree(
        &self,
        repo: &Path,
        branch: &str,
        target: &Path,
        base: Option<&str>,
    ) -> Result<()>;

    /// Remove a worktree. A path that is already gone counts as success.
    async fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<()>;

    async fn move_worktree(&self, repo: &Path, from: &Path, to: &Path) -> Result<()>;

    async fn rename_branch(&self, repo: &Path, old: &str, new: &str) -> Result<()>;

    async fn delete_branch(&self, repo: &Path, branch: &str) -> Result<()>;

    /// Local branch names. Archived threads leave theirs behind.
    async fn list_branches(&self, repo: &Path) -> Result<Vec<String>>;

    /// No uncommitted changes (tracked or untracked) in `path`.
    async fn is_clean(&self, path: &Path) -> Result<bool>;

    /// The branch checked out at `path` is an ancestor of (or equal to) `base`.
    async fn is_merged_into(&self, path: &Path, base: &str) -> Result<bool>;

    /// Branch checked out at `path`, `None` on a detached HEAD.
    async fn current_branch(&self, path: &Path) -> Result<Option<String>>;

    /// Remote HEAD, then `main`/`master`, then `FALLBACK_DEFAULT_BRANCH`.
    /// `None` only when the repository can't be inspected at all.
    async fn detect_default_branch(&self, repo: &Path) -> Option<String>;

    async fn get_remotes(&self, repo: &Path) -> Result<Vec<Remote>>;
}

/// `GitWorktreeService` backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl GitCli {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn output(&self, dir: &Path, args: &[&str]) -> Result<ToolOutput> {
        run_tool("git", "git", args, Some(dir), self.timeout).await
    }

    /// Run git and return trimmed stdout, failing on non-zero exit.
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let out = self.output(dir, args).await?.into_result("git", args)?;
        Ok(out.trim().to_string())
    }

    async fn rev_exists(&self, repo: &Path, rev: &str) -> Result<bool> {
        let spec = format!("{rev}^{{commit}}");
        Ok(self
            .output(repo, &["rev-parse", "--verify", "--quiet", &spec])
            .await?
            .success)
    }

    async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool> {
        let full = format!("refs/heads/{branch}");
        Ok(self
            .output(repo, &["show-ref", "--verify", "--quiet", &full])
            .await?
            .success)
    }

    /// Query the remote's default branch via `git symbolic-ref`.
    async fn default_branch_from_remote(&self, repo: &Path) -> Option<String> {
        let out = self
            .output(repo, &["symbolic-ref", "refs/remotes/origin/HEAD", "--short"])
            .await
            .ok()?;
        if !out.success {
            return None;
        }
        out.stdout
            .trim()
            .strip_prefix("origin/")
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl GitWorktreeService for GitCli {
    async fn create_worktree(
        &self,
        repo: &Path,
        branch: &str,
        target: &Path,
        base: Option<&str>,
    ) -> Result<()> {
        if target.exists() {
            return Err(Error::PathExists(target.to_path_buf()));
        }
        if self.branch_exists(repo, branch).await? {
            return Err(Error::BranchExists(branch.to_string()));
        }
        if let Some(base) = base {
            if !self.rev_exists(repo, base).await? {
                return Err(Error::BaseBranchMissing(base.to_string()));
            }
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let target_str = target.display().to_string();
        let mut args = vec!["worktree", "add", "-b", branch, target_str.as_str()];
        if let Some(base) = base {
            args.push(base);
        }
        self.run(repo, &args).await?;
        debug!(branch, target = %target.display(), "created worktree");
        Ok(())
    }

    async fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<()> {
        if !path.exists() {
            debug!(path = %path.display(), "worktree already gone, pruning");
            self.run(repo, &["worktree", "prune"]).await?;
            return Ok(());
        }
        let path_str = path.display().to_string();
        match self
            .run(repo, &["worktree", "remove", "--force", &path_str])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if !path.exists() => {
                warn!(path = %path.display(), "worktree remove failed after path vanished: {e}");
                self.run(repo, &["worktree", "prune"]).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn move_worktree(&self, repo: &Path, from: &Path, to: &Path) -> Result<()> {
        if to.exists() {
            return Err(Error::PathExists(to.to_path_buf()));
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let from_str = from.display().to_string();
        let to_str = to.display().to_string();
        self.run(repo, &["worktree", "move", &from_str, &to_str])
            .await?;
        Ok(())
    }

    async fn rename_branch(&self, repo: &Path, old: &str, new: &str) -> Result<()> {
        if self.branch_exists(repo, new).await? {
            return Err(Error::BranchExists(new.to_string()));
        }
        self.run(repo, &["branch", "-m", old, new]).await?;
        Ok(())
    }

    async fn delete_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        self.run(repo, &["branch", "-D", branch]).await?;
        Ok(())
    }

    async fn list_branches(&self, repo: &Path) -> Result<Vec<String>> {
        let out = self
            .run(repo, &["branch", "--format=%(refname:short)"])
            .await?;
        Ok(out
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn is_clean(&self, path: &Path) -> Result<bool> {
        let status = self.run(path, &["status", "--porcelain"]).await?;
        Ok(status.is_empty())
    }

    async fn is_merged_into(&self, path: &Path, base: &str) -> Result<bool> {
        let args = ["merge-base", "--is-ancestor", "HEAD", base];
        let out = self.output(path, &args).await?;
        match out.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => out.into_result("git", &args).map(|_| false),
        }
    }

    async fn current_branch(&self, path: &Path) -> Result<Option<String>> {
        let args = ["symbolic-ref", "--quiet", "--short", "HEAD"];
        let out = self.output(path, &args).await?;
        match out.code {
            Some(0) => Ok(Some(out.stdout.trim().to_string())),
            Some(1) => Ok(None),
            _ => out.into_result("git", &args).map(|_| None),
        }
    }

    async fn detect_default_branch(&self, repo: &Path) -> Option<String> {
        let branches = match self.list_branches(repo).await {
            Ok(b) => b,
            Err(e) => {
                warn!(repo = %repo.display(), "cannot list branches: {e}");
                return None;
            }
        };
        let remote = self.default_branch_from_remote(repo).await;
        Some(
            default_branch(remote.as_deref(), &branches)
                .unwrap_or_else(|| FALLBACK_DEFAULT_BRANCH.to_string()),
        )
    }

    async fn get_remotes(&self, repo: &Path) -> Result<Vec<Remote>> {
        let out = self.run(repo, &["remote", "-v"]).await?;
        Ok(parse_remotes(&out))
    }
}

/// Pick the default branch from the remote HEAD and the local branch list.
///
/// Prefers the remote HEAD when it exists locally, then `main`, then `master`.
pub fn default_branch(remote_head: Option<&str>, local_branches: &[String]) -> Option<String> {
    if let Some(name) = remote_head {
        if local_branches.iter().any(|b| b == name) {
            return Some(name.to_string());
        }
    }

    for candidate in ["main", "master"] {
        if local_branches.iter().any(|b| b == candidate) {
            return Some(candidate.to_string());
        }
    }

    None
}

/// Worktree directory for a thread slug under a project's worktrees base.
pub fn worktree_path(base: &Path, thread_slug: &str) -> PathBuf {
    base.join(thread_slug.replace('/', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worktree_path_simple() {
        assert_eq!(
            worktree_path(Path::new("/wt/acme"), "river-otter"),
            PathBuf::from("/wt/acme/river-otter")
        );
    }

    #[test]
    fn worktree_path_flattens_slashes() {
        assert_eq!(
            worktree_path(Path::new("/wt"), "feature/foo"),
            PathBuf::from("/wt/feature-foo")
        );
    }

    #[test]
    fn default_branch_prefers_remote_head() {
        let branches = vec!["develop".to_string(), "main".to_string()];
        assert_eq!(
            default_branch(Some("develop"), &branches),
            Some("develop".to_string())
        );
    }

    #[test]
    fn default_branch_ignores_remote_head_missing_locally() {
        let branches = vec!["master".to_string()];
        assert_eq!(
            default_branch(Some("trunk"), &branches),
            Some("master".to_string())
        );
    }

    #[test]
    fn default_branch_prefers_main_over_master() {
        let branches = vec![
            "develop".to_string(),
            "master".to_string(),
            "main".to_string(),
        ];
        assert_eq!(default_branch(None, &branches), Some("main".to_string()));
    }

    #[test]
    fn default_branch_returns_none_when_no_candidates() {
        let branches = vec!["develop".to_string(), "feature".to_string()];
        assert_eq!(default_branch(None, &branches), None);
    }

    #[test]
    fn default_branch_returns_none_for_empty_branches() {
        assert_eq!(default_branch(None, &[]), None);
    }

    #[tokio::test]
    async fn detect_default_branch_outside_repo_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let git = GitCli::new(Duration::from_secs(10));
        assert_eq!(git.detect_default_branch(dir.path()).await, None);
    }

    #[tokio::test]
    async fn remove_missing_worktree_outside_repo_fails_cleanly() {
        let dir = tempfile::TempDir::new().unwrap();
        let git = GitCli::new(Duration::from_secs(10));
        let err = git
            .remove_worktree(dir.path(), &dir.path().join("gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExternalTool { .. }));
    }
}
