use async_trait::async_trait;
use atzentis_core::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// An isolated working copy plus its branch, created for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeHandle {
    pub task_id: TaskId,
    pub path: PathBuf,
    pub branch: String,
    pub created_at: DateTime<Utc>,
}

impl WorktreeHandle {
    pub fn new(task_id: TaskId, path: PathBuf, branch: impl Into<String>) -> Self {
        Self {
            task_id,
            path,
            branch: branch.into(),
            created_at: Utc::now(),
        }
    }
}

/// Options for acquiring a task worktree.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub base_branch: String,
    /// Optional human-readable suffix appended to the branch name.
    pub slug: Option<String>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            slug: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(String),
    NothingToCommit,
}

impl CommitOutcome {
    pub fn sha(&self) -> Option<&str> {
        match self {
            Self::Committed(sha) => Some(sha),
            Self::NothingToCommit => None,
        }
    }
}

/// Scoped acquisition of per-task working copies. The executor only ever
/// talks to this trait; the canonical path for a task id is a pure function
/// of the manager's configuration, which is what makes resume work without
/// persisting paths.
#[async_trait]
pub trait Worktrees: Send + Sync {
    /// Acquire the worktree for a task. Returns an existing worktree at the
    /// canonical path unchanged; otherwise creates a new branch off
    /// `opts.base_branch` and a fresh worktree.
    async fn create(&self, task_id: &TaskId, opts: &CreateOptions) -> Result<WorktreeHandle>;

    /// Idempotent removal of the task's worktree.
    async fn remove(&self, task_id: &TaskId, force: bool) -> Result<()>;

    /// Stage (when `add_all`) and commit. `NothingToCommit` when the tree is
    /// clean.
    async fn commit(&self, task_id: &TaskId, message: &str, add_all: bool)
        -> Result<CommitOutcome>;

    async fn push(&self, task_id: &TaskId, set_upstream: bool, remote: &str) -> Result<()>;

    async fn has_uncommitted_changes(&self, task_id: &TaskId) -> Result<bool>;

    async fn changed_files(&self, task_id: &TaskId) -> Result<Vec<String>>;

    async fn diff(&self, task_id: &TaskId, staged: bool) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_new() {
        let id = TaskId::parse("T01-001").unwrap();
        let handle = WorktreeHandle::new(id.clone(), PathBuf::from("/tmp/wt"), "demo/t01-001");

        assert_eq!(handle.task_id, id);
        assert_eq!(handle.branch, "demo/t01-001");
    }

    #[test]
    fn test_commit_outcome_sha() {
        assert_eq!(
            CommitOutcome::Committed("abc123".to_string()).sha(),
            Some("abc123")
        );
        assert_eq!(CommitOutcome::NothingToCommit.sha(), None);
    }
}
