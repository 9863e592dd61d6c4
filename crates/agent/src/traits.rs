use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::completion::CompletionMeta;
use crate::error::Result;

/// Default hard timeout for one agent invocation: 10 minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(600_000);

/// Default number of engine-internal retries.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Outcome of one agent execution (after the engine's internal retries).
///
/// `success` tracks the exit code; `completed` tracks the completion token.
/// They are independent: an agent may exit non-zero after emitting the token
/// and still counts as completed.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub success: bool,
    pub output: String,
    pub exit_code: i32,
    pub duration_ms: i64,
    pub completed: bool,
    pub error: Option<String>,
    pub meta: Option<CompletionMeta>,
}

/// Options forwarded to an engine invocation.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub working_directory: Option<PathBuf>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub dangerously_skip_permissions: bool,
    pub model: Option<String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            working_directory: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            dangerously_skip_permissions: false,
            model: None,
        }
    }
}

impl ExecOptions {
    pub fn with_working_directory(mut self, dir: PathBuf) -> Self {
        self.working_directory = Some(dir);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// The capability set the executor depends on. Variants are enumerated in
/// the [`crate::EngineRegistry`]; the default variant spawns a subprocess.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, prompt: &str, opts: &ExecOptions) -> Result<AgentResult>;

    /// Whether the combined output carries the completion token.
    fn check_completion(&self, output: &str) -> bool;
}

/// Backoff before retry `attempt` (0-based): `min(1000 * 2^attempt, 30000)` ms.
pub fn backoff_ms(attempt: u32) -> u64 {
    1000u64.saturating_mul(1u64 << attempt.min(15)).min(30_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(backoff_ms(0), 1000);
        assert_eq!(backoff_ms(1), 2000);
        assert_eq!(backoff_ms(2), 4000);
        assert_eq!(backoff_ms(4), 16_000);
        assert_eq!(backoff_ms(5), 30_000);
        assert_eq!(backoff_ms(20), 30_000);
    }

    #[test]
    fn test_default_options() {
        let opts = ExecOptions::default();
        assert_eq!(opts.timeout, Duration::from_millis(600_000));
        assert_eq!(opts.max_retries, 2);
        assert!(!opts.dangerously_skip_permissions);
    }
}
