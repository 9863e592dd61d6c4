//! Default engine variant: an external CLI spawned per invocation.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::completion::{contains_token, extract_meta, DEFAULT_COMPLETION_TOKEN};
use crate::error::{AgentError, Result};
use crate::traits::{backoff_ms, AgentEngine, AgentResult, ExecOptions};

/// Exit code reported when the child is killed on timeout.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// How the subprocess engine invokes its command.
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Feed the prompt on stdin instead of as a trailing argument.
    pub prompt_via_stdin: bool,
    pub completion_token: String,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self::claude()
    }
}

impl SubprocessConfig {
    /// The `claude` CLI: prompt as trailing argument, non-interactive print
    /// mode.
    pub fn claude() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["--print".to_string()],
            prompt_via_stdin: false,
            completion_token: DEFAULT_COMPLETION_TOKEN.to_string(),
        }
    }

    /// The `codex` CLI: `codex exec -` reads the prompt on stdin.
    pub fn codex() -> Self {
        Self {
            command: "codex".to_string(),
            args: vec![
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            prompt_via_stdin: true,
            completion_token: DEFAULT_COMPLETION_TOKEN.to_string(),
        }
    }
}

pub struct SubprocessAgent {
    name: String,
    config: SubprocessConfig,
}

impl SubprocessAgent {
    pub fn new(name: impl Into<String>, config: SubprocessConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// One invocation without the retry envelope.
    async fn run_once(&self, prompt: &str, opts: &ExecOptions) -> Result<AgentResult> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);

        if let Some(model) = &opts.model {
            cmd.arg("--model").arg(model);
        }
        if opts.dangerously_skip_permissions {
            cmd.arg("--dangerously-skip-permissions");
        }
        if !self.config.prompt_via_stdin {
            cmd.arg(prompt);
        }
        if let Some(dir) = &opts.working_directory {
            cmd.current_dir(dir);
        }

        cmd.env("CI", "true")
            .stdin(if self.config.prompt_via_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| AgentError::Spawn {
            command: self.config.command.clone(),
            source,
        })?;

        if self.config.prompt_via_stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(prompt.as_bytes()).await?;
                // Dropping closes the pipe so the child sees EOF.
            }
        }

        // Stream stdout and stderr concurrently into one combined buffer so
        // neither pipe can fill up and stall the child.
        let output = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(collect_lines(stdout, output.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(collect_lines(stderr, output.clone())));
        }

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = tokio::time::sleep(opts.timeout) => {
                warn!(
                    engine = %self.name,
                    timeout_ms = opts.timeout.as_millis() as u64,
                    "agent timed out, killing child"
                );
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };

        for reader in readers {
            let _ = reader.await;
        }
        let output = Arc::try_unwrap(output)
            .map(|m| m.into_inner())
            .unwrap_or_default();

        let duration_ms = start.elapsed().as_millis() as i64;

        let result = match status {
            Some(status) => {
                let exit_code = status.code().unwrap_or(-1);
                let completed = contains_token(&output, &self.config.completion_token);
                let meta = completed
                    .then(|| extract_meta(&output, &self.config.completion_token))
                    .flatten();
                AgentResult {
                    success: status.success(),
                    exit_code,
                    duration_ms,
                    completed,
                    error: (!status.success())
                        .then(|| format!("agent exited with code {}", exit_code)),
                    meta,
                    output,
                }
            }
            None => AgentResult {
                success: false,
                exit_code: TIMEOUT_EXIT_CODE,
                duration_ms,
                completed: false,
                error: Some("timeout".to_string()),
                meta: None,
                output,
            },
        };

        debug!(
            engine = %self.name,
            exit_code = result.exit_code,
            completed = result.completed,
            duration_ms = result.duration_ms,
            "agent attempt finished"
        );
        Ok(result)
    }
}

#[async_trait]
impl AgentEngine for SubprocessAgent {
    fn name(&self) -> &str {
        &self.name
    }

    /// Run the subprocess with the inner retry envelope: retry only when the
    /// exit code is non-zero AND the completion token is absent. A completed
    /// run short-circuits retries even on a failing exit code.
    async fn execute(&self, prompt: &str, opts: &ExecOptions) -> Result<AgentResult> {
        let mut attempt: u32 = 0;
        loop {
            let result = self.run_once(prompt, opts).await?;

            if result.success || result.completed || attempt >= opts.max_retries {
                if attempt > 0 {
                    info!(
                        engine = %self.name,
                        attempts = attempt + 1,
                        completed = result.completed,
                        "agent finished after retries"
                    );
                }
                return Ok(result);
            }

            let delay = backoff_ms(attempt);
            warn!(
                engine = %self.name,
                attempt = attempt + 1,
                max_retries = opts.max_retries,
                delay_ms = delay,
                "agent attempt failed, backing off"
            );
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }

    fn check_completion(&self, output: &str) -> bool {
        contains_token(output, &self.config.completion_token)
    }
}

async fn collect_lines<R>(reader: R, sink: Arc<Mutex<String>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut buf = sink.lock().await;
        buf.push_str(&line);
        buf.push('\n');
    }
}
