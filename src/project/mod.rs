use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentType;
use crate::naming;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(Uuid);

impl ProjectId {
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A source repository threads are created against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Repo slug embedded in every session name of this project.
    pub slug: String,
    pub repo_path: PathBuf,
    /// Directory new thread worktrees are created under.
    pub worktrees_base: PathBuf,
    /// Overrides default-branch detection when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,
}

impl Project {
    /// Build a project for `repo_path` with a slug for which `is_taken` is false.
    ///
    /// The display name defaults to the repository directory name.
    pub fn new(
        repo_path: PathBuf,
        name: Option<String>,
        worktrees_root: &Path,
        is_taken: impl Fn(&str) -> bool,
    ) -> Self {
        let name = name.unwrap_or_else(|| default_project_name(&repo_path));
        let slug = naming::unique_slug(&naming::slugify(&name), is_taken);
        let worktrees_base = worktrees_root.join(&slug);
        Self {
            id: ProjectId::default(),
            name,
            slug,
            repo_path,
            worktrees_base,
            default_branch: None,
            agent_type: None,
        }
    }

    /// Worktree directory for a thread slug.
    pub fn worktree_path_for(&self, thread_slug: &str) -> PathBuf {
        crate::git::worktree_path(&self.worktrees_base, thread_slug)
    }
}

fn default_project_name(repo_path: &Path) -> String {
    repo_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string())
}
