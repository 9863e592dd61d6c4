//! Pull requests through the `gh` CLI, reusing the operator's own
//! authentication. Everything here is best-effort from the executor's point
//! of view.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{GitHubError, Result};
use crate::types::{PrSpec, PullRequest};

pub struct GhCli {
    cwd: PathBuf,
}

impl GhCli {
    /// Probe `gh auth status` and hand back a client only when the CLI is
    /// installed and authenticated. There is no unauthenticated client.
    pub async fn detect(cwd: impl AsRef<Path>) -> Option<Self> {
        let probe = Command::new("gh")
            .args(["auth", "status"])
            .output()
            .await
            .ok()?;
        if !probe.status.success() {
            debug!("gh auth status reported no usable login");
            return None;
        }
        Some(Self {
            cwd: cwd.as_ref().to_path_buf(),
        })
    }

    /// Open a PR for a finished task. Title and body are rendered from the
    /// task data in `spec`.
    pub async fn open_pull_request(&self, spec: &PrSpec) -> Result<PullRequest> {
        let title = spec.title();
        info!(branch = %spec.branch, base = %spec.base, title = %title, "opening pull request");

        let mut cmd = Command::new("gh");
        cmd.args(["pr", "create", "--head", spec.branch.as_str()])
            .args(["--base", spec.base.as_str()])
            .arg("--title")
            .arg(&title)
            .arg("--body")
            .arg(spec.body());
        if spec.draft {
            cmd.arg("--draft");
        }

        let output = cmd.current_dir(&self.cwd).output().await?;
        if !output.status.success() {
            return Err(GitHubError::CommandFailed {
                command: "pr create".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // On success gh prints nothing but the PR URL.
        let html_url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let number = pr_number(&html_url).unwrap_or_default();
        debug!(number, url = %html_url, "pull request opened");

        Ok(PullRequest {
            number,
            title,
            head_branch: spec.branch.clone(),
            base_branch: spec.base.clone(),
            html_url,
            created_at: chrono::Utc::now(),
        })
    }
}

/// Trailing path segment of a PR URL, when numeric.
fn pr_number(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}
