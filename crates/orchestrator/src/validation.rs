//! Post-agent validation: the project's lint and test commands, run inside
//! the task worktree. A non-zero exit fails the task.

use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// How much command output to keep in the failure message.
const OUTPUT_TAIL_BYTES: usize = 2000;

#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub command: String,
    pub exit_code: i32,
    pub output: String,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "`{}` exited {}: {}",
            self.command, self.exit_code, self.output
        )
    }
}

/// Run lint then test, stopping at the first failure.
pub async fn run_validation(
    dir: &Path,
    lint: Option<&str>,
    test: Option<&str>,
) -> Result<(), ValidationFailure> {
    for command in [lint, test].into_iter().flatten() {
        run_command(dir, command).await?;
    }
    Ok(())
}

async fn run_command(dir: &Path, command: &str) -> Result<(), ValidationFailure> {
    info!(command, dir = %dir.display(), "running validation command");

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| ValidationFailure {
            command: command.to_string(),
            exit_code: -1,
            output: format!("failed to spawn: {}", e),
        })?;

    if output.status.success() {
        debug!(command, "validation command passed");
        return Ok(());
    }

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let tail = if combined.len() > OUTPUT_TAIL_BYTES {
        combined[combined.len() - OUTPUT_TAIL_BYTES..].to_string()
    } else {
        combined
    };

    Err(ValidationFailure {
        command: command.to_string(),
        exit_code: output.status.code().unwrap_or(-1),
        output: tail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_no_commands_passes() {
        let dir = TempDir::new().unwrap();
        run_validation(dir.path(), None, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_passing_commands() {
        let dir = TempDir::new().unwrap();
        run_validation(dir.path(), Some("true"), Some("true"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lint_failure_stops_before_test() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("test-ran");

        let failure = run_validation(
            dir.path(),
            Some("echo lint broken; exit 1"),
            Some(&format!("touch {}", marker.display())),
        )
        .await
        .unwrap_err();

        assert_eq!(failure.exit_code, 1);
        assert!(failure.output.contains("lint broken"));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_commands_run_in_worktree_dir() {
        let dir = TempDir::new().unwrap();
        run_validation(dir.path(), None, Some("touch here"))
            .await
            .unwrap();
        assert!(dir.path().join("here").exists());
    }
}
