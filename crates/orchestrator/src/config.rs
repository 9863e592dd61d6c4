//! Project-level configuration at `<projectRoot>/.atzentis/config.json`.
//! Absent or malformed files fall back to defaults; configuration problems
//! never abort a run.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::hooks::HooksConfig;

const CONFIG_FILE: &str = ".atzentis/config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ProjectConfig {
    /// Project slug used in branch names and the session store. Defaults to
    /// the project directory name when empty.
    pub project: String,
    pub specs_root: String,
    pub base_branch: String,
    pub remote: String,
    pub worktree_base: String,
    pub max_parallel: usize,
    pub commands: CommandsConfig,
    pub hooks: HooksConfig,
    pub agent: AgentConfig,
    pub pr: PrConfig,
    pub commit_trailer: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            specs_root: "specs".to_string(),
            base_branch: "main".to_string(),
            remote: "origin".to_string(),
            worktree_base: "../.atzentis-worktrees".to_string(),
            max_parallel: 3,
            commands: CommandsConfig::default(),
            hooks: HooksConfig::default(),
            agent: AgentConfig::default(),
            pr: PrConfig::default(),
            commit_trailer: "Generated-by: atzentis".to_string(),
        }
    }
}

/// Validation commands run in the worktree after the agent completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct CommandsConfig {
    pub lint: Option<String>,
    pub test: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
    pub prompt_via_stdin: bool,
    pub model: Option<String>,
    pub dangerously_skip_permissions: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub completion_token: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["--print".to_string()],
            prompt_via_stdin: false,
            model: None,
            dangerously_skip_permissions: false,
            timeout_ms: 600_000,
            max_retries: 2,
            completion_token: agent::DEFAULT_COMPLETION_TOKEN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PrConfig {
    pub enabled: bool,
    pub draft: bool,
    /// PR base branch; falls back to `base_branch` when unset.
    pub base: Option<String>,
}

impl ProjectConfig {
    pub async fn read(project_root: &Path) -> Self {
        let path = project_root.join(CONFIG_FILE);

        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Self::with_project_fallback(Self::default(), project_root);
        }

        let config = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read config, using defaults");
                Self::default()
            }
        };

        Self::with_project_fallback(config, project_root)
    }

    pub async fn write(&self, project_root: &Path) -> std::io::Result<()> {
        let path = project_root.join(CONFIG_FILE);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&path, content).await
    }

    fn with_project_fallback(mut config: Self, project_root: &Path) -> Self {
        if config.project.is_empty() {
            config.project = project_root
                .file_name()
                .map(|name| name.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| "project".to_string());
        }
        config
    }

    pub fn agent_exec_options(&self) -> agent::ExecOptions {
        agent::ExecOptions {
            working_directory: None,
            timeout: std::time::Duration::from_millis(self.agent.timeout_ms),
            max_retries: self.agent.max_retries,
            dangerously_skip_permissions: self.agent.dangerously_skip_permissions,
            model: self.agent.model.clone(),
        }
    }

    pub fn subprocess_config(&self) -> agent::SubprocessConfig {
        agent::SubprocessConfig {
            command: self.agent.command.clone(),
            args: self.agent.args.clone(),
            prompt_via_stdin: self.agent.prompt_via_stdin,
            completion_token: self.agent.completion_token.clone(),
        }
    }
}
