use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent command {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Unknown agent engine: {0}")]
    UnknownEngine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
