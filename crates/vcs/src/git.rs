use async_trait::async_trait;
use atzentis_core::TaskId;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, VcsError};
use crate::traits::{CommitOutcome, CreateOptions, WorktreeHandle, Worktrees};

/// Git-backed worktree manager. One worktree and one branch per task, laid
/// out under `<base_dir>/<project>/<pp-nnn>/`.
pub struct GitWorktrees {
    repo_path: PathBuf,
    base_dir: PathBuf,
    project: String,
}

impl GitWorktrees {
    pub fn new(repo_path: PathBuf, base_dir: PathBuf, project: impl Into<String>) -> Self {
        Self {
            repo_path,
            base_dir,
            project: project.into(),
        }
    }

    /// Canonical worktree path: a pure function of `(base_dir, project,
    /// task_id)`, so a resumed run finds the same path without persisting it.
    pub fn worktree_path(&self, task_id: &TaskId) -> PathBuf {
        self.base_dir
            .join(&self.project)
            .join(task_id.path_segment())
    }

    /// Branch name `<project>/<taskid>[-<slug>]`, lowercased.
    pub fn branch_name(&self, task_id: &TaskId, slug: Option<&str>) -> String {
        let mut name = format!("{}/{}", self.project, task_id);
        if let Some(slug) = slug {
            name.push('-');
            name.push_str(slug);
        }
        name.to_lowercase()
    }

    /// Run one git command in `cwd`, returning stdout. Stderr only surfaces
    /// in the error when git exits non-zero.
    async fn run_git(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        let rendered = args.join(" ");
        debug!(cwd = %cwd.display(), "git {rendered}");

        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(VcsError::CommandFailed(format!(
            "git {rendered}: {}",
            stderr.trim()
        )))
    }

    fn require_worktree(&self, task_id: &TaskId) -> Result<PathBuf> {
        let path = self.worktree_path(task_id);
        if !path.exists() {
            return Err(VcsError::WorktreeNotFound(task_id.to_string()));
        }
        Ok(path)
    }

    async fn branch_exists(&self, branch: &str) -> bool {
        self.run_git(
            &self.repo_path,
            &[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{}", branch),
            ],
        )
        .await
        .is_ok()
    }

    async fn current_branch(&self, worktree: &Path) -> Result<String> {
        let out = self
            .run_git(worktree, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        Ok(out.trim().to_string())
    }

    /// Worktrees of this project, recovered from `git worktree list`.
    /// Task ids are parsed back out of the branch names this manager
    /// creates, so foreign worktrees are skipped.
    pub async fn list(&self) -> Result<Vec<WorktreeHandle>> {
        let output = self
            .run_git(&self.repo_path, &["worktree", "list", "--porcelain"])
            .await?;

        let prefix = format!("{}/t", self.project.to_lowercase());
        let mut handles = Vec::new();
        let mut current_path: Option<PathBuf> = None;

        for line in output.lines().chain(std::iter::once("")) {
            if let Some(path) = line.strip_prefix("worktree ") {
                current_path = Some(PathBuf::from(path));
            } else if let Some(branch) = line.strip_prefix("branch refs/heads/") {
                let Some(path) = current_path.take() else {
                    continue;
                };
                if !branch.starts_with(&prefix) {
                    continue;
                }
                if let Some(task_id) = task_id_from_branch(branch, &prefix) {
                    handles.push(WorktreeHandle::new(task_id, path, branch));
                }
            } else if line.is_empty() {
                current_path = None;
            }
        }

        Ok(handles)
    }
}

/// `demo/t03-012-some-slug` -> `T03-012`.
fn task_id_from_branch(branch: &str, prefix: &str) -> Option<TaskId> {
    let rest = branch.strip_prefix(prefix)?;
    if rest.len() < 6 {
        return None;
    }
    TaskId::parse(&format!("T{}", &rest[..6])).ok()
}

#[async_trait]
impl Worktrees for GitWorktrees {
    async fn create(&self, task_id: &TaskId, opts: &CreateOptions) -> Result<WorktreeHandle> {
        let path = self.worktree_path(task_id);

        // Resume case: the worktree survived the previous run, hand it back.
        if path.exists() {
            let branch = self.current_branch(&path).await?;
            debug!(task_id = %task_id, path = %path.display(), "reusing existing worktree");
            return Ok(WorktreeHandle::new(task_id.clone(), path, branch));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Freshen the base branch; offline runs still work from local state.
        if let Err(e) = self
            .run_git(&self.repo_path, &["fetch", "origin", &opts.base_branch])
            .await
        {
            warn!(base_branch = %opts.base_branch, error = %e, "fetch failed, using local base");
        }

        let branch = self.branch_name(task_id, opts.slug.as_deref());
        let path_str = path
            .to_str()
            .ok_or_else(|| VcsError::InvalidPath(path.display().to_string()))?;

        if self.branch_exists(&branch).await {
            // Branch left over from an interrupted run; reattach instead of
            // recreating it.
            self.run_git(&self.repo_path, &["worktree", "add", path_str, &branch])
                .await?;
        } else {
            self.run_git(
                &self.repo_path,
                &[
                    "worktree",
                    "add",
                    "-b",
                    &branch,
                    path_str,
                    &opts.base_branch,
                ],
            )
            .await?;
        }

        debug!(task_id = %task_id, branch = %branch, path = %path.display(), "worktree created");
        Ok(WorktreeHandle::new(task_id.clone(), path, branch))
    }

    async fn remove(&self, task_id: &TaskId, force: bool) -> Result<()> {
        let path = self.worktree_path(task_id);
        if !path.exists() {
            return Ok(());
        }

        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        let path_str = path.display().to_string();
        args.push(&path_str);

        if let Err(e) = self.run_git(&self.repo_path, &args).await {
            warn!(task_id = %task_id, error = %e, "worktree remove failed, falling back to rm");
            if path.exists() {
                tokio::fs::remove_dir_all(&path).await?;
            }
            let _ = self.run_git(&self.repo_path, &["worktree", "prune"]).await;
        }

        Ok(())
    }

    async fn commit(
        &self,
        task_id: &TaskId,
        message: &str,
        add_all: bool,
    ) -> Result<CommitOutcome> {
        let path = self.require_worktree(task_id)?;

        if add_all {
            self.run_git(&path, &["add", "-A"]).await?;
        }

        let status = self.run_git(&path, &["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            return Ok(CommitOutcome::NothingToCommit);
        }

        self.run_git(&path, &["commit", "-m", message]).await?;
        let sha = self.run_git(&path, &["rev-parse", "HEAD"]).await?;
        Ok(CommitOutcome::Committed(sha.trim().to_string()))
    }

    async fn push(&self, task_id: &TaskId, set_upstream: bool, remote: &str) -> Result<()> {
        let path = self.require_worktree(task_id)?;
        let branch = self.current_branch(&path).await?;

        let mut args = vec!["push"];
        if set_upstream {
            args.push("-u");
        }
        args.push(remote);
        args.push(&branch);

        self.run_git(&path, &args).await?;
        Ok(())
    }

    async fn has_uncommitted_changes(&self, task_id: &TaskId) -> Result<bool> {
        let path = self.require_worktree(task_id)?;
        let status = self.run_git(&path, &["status", "--porcelain"]).await?;
        Ok(!status.trim().is_empty())
    }

    async fn changed_files(&self, task_id: &TaskId) -> Result<Vec<String>> {
        let path = self.require_worktree(task_id)?;
        let status = self.run_git(&path, &["status", "--porcelain"]).await?;

        Ok(status
            .lines()
            .filter(|line| line.len() > 3)
            .map(|line| line[3..].trim().to_string())
            .collect())
    }

    async fn diff(&self, task_id: &TaskId, staged: bool) -> Result<String> {
        let path = self.require_worktree(task_id)?;
        if staged {
            self.run_git(&path, &["diff", "--cached"]).await
        } else {
            self.run_git(&path, &["diff"]).await
        }
    }
}
