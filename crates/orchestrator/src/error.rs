use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown dependency: {task} depends on {dependency}, which is not in the run")]
    UnknownDependency { task: String, dependency: String },

    #[error("Circular dependency: {}", path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    #[error("Unschedulable tasks (cross-group dependency conflict): {}", remaining.join(", "))]
    UnschedulableTasks { remaining: Vec<String> },

    #[error("Hook {hook} failed: {output}")]
    HookFailed { hook: String, output: String },

    #[error("Agent did not complete task {task_id}: {reason}")]
    AgentIncomplete { task_id: String, reason: String },

    #[error("Validation failed for {task_id}: {reason}")]
    ValidationFailed { task_id: String, reason: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("No session store found; nothing to resume")]
    NoSessionStore,

    #[error("Session store error: {0}")]
    Db(#[from] db::DbError),

    #[error("Worktree error: {0}")]
    Vcs(#[from] vcs::VcsError),

    #[error("Agent engine error: {0}")]
    Agent(#[from] agent::AgentError),

    #[error("Task loading error: {0}")]
    Specs(#[from] specs::SpecsError),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
