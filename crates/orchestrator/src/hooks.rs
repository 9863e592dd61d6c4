//! Lifecycle hooks: user-configured shell commands fired around phases and
//! tasks. `before_*` failures abort the step they guard; `after_task`,
//! `on_success` and `on_error` failures only warn, so they can never mask a
//! task result.

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

/// Env var prefix injected into every hook spawn.
const ENV_PREFIX: &str = "ATZENTIS_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HooksConfig {
    #[serde(default)]
    pub before_phase: Option<String>,
    #[serde(default)]
    pub before_task: Option<String>,
    #[serde(default)]
    pub after_task: Option<String>,
    #[serde(default)]
    pub on_success: Option<String>,
    #[serde(default)]
    pub on_error: Option<String>,
}

/// Context exported to the hook as `ATZENTIS_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub project: String,
    pub phase: String,
    pub task_id: String,
    pub task_name: String,
    /// `success`, `error` or empty.
    pub status: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone, Default)]
pub struct HookRunner {
    config: HooksConfig,
}

impl HookRunner {
    pub fn new(config: HooksConfig) -> Self {
        Self { config }
    }

    /// Fatal on failure: the phase must not start.
    pub async fn before_phase(&self, ctx: &HookContext) -> Result<()> {
        self.run_fatal("before_phase", self.config.before_phase.as_deref(), ctx)
            .await
    }

    /// Fatal on failure: the task must not start.
    pub async fn before_task(&self, ctx: &HookContext) -> Result<()> {
        self.run_fatal("before_task", self.config.before_task.as_deref(), ctx)
            .await
    }

    pub async fn after_task(&self, ctx: &HookContext) {
        self.run_warn("after_task", self.config.after_task.as_deref(), ctx)
            .await;
    }

    pub async fn on_success(&self, ctx: &HookContext) {
        self.run_warn("on_success", self.config.on_success.as_deref(), ctx)
            .await;
    }

    pub async fn on_error(&self, ctx: &HookContext) {
        self.run_warn("on_error", self.config.on_error.as_deref(), ctx)
            .await;
    }

    async fn run_fatal(
        &self,
        name: &str,
        command: Option<&str>,
        ctx: &HookContext,
    ) -> Result<()> {
        let Some(command) = command else {
            return Ok(());
        };
        let outcome = spawn_hook(command, ctx).await;
        if outcome.success {
            Ok(())
        } else {
            Err(OrchestratorError::HookFailed {
                hook: name.to_string(),
                output: outcome.output,
            })
        }
    }

    async fn run_warn(&self, name: &str, command: Option<&str>, ctx: &HookContext) {
        let Some(command) = command else {
            return;
        };
        let outcome = spawn_hook(command, ctx).await;
        if !outcome.success {
            warn!(hook = name, output = %outcome.output, "hook failed (ignored)");
        }
    }
}

async fn spawn_hook(command: &str, ctx: &HookContext) -> HookOutcome {
    debug!(command, task_id = %ctx.task_id, "running hook");

    let result = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env(format!("{ENV_PREFIX}PROJECT"), &ctx.project)
        .env(format!("{ENV_PREFIX}PHASE"), &ctx.phase)
        .env(format!("{ENV_PREFIX}TASK_ID"), &ctx.task_id)
        .env(format!("{ENV_PREFIX}TASK_NAME"), &ctx.task_name)
        .env(format!("{ENV_PREFIX}STATUS"), &ctx.status)
        .env(format!("{ENV_PREFIX}ERROR"), &ctx.error)
        .output()
        .await;

    match result {
        Ok(output) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            HookOutcome {
                success: output.status.success(),
                output: combined,
            }
        }
        Err(e) => HookOutcome {
            success: false,
            output: format!("failed to spawn hook: {}", e),
        },
    }
}
