use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("could not spawn gh: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("gh {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

pub type Result<T> = std::result::Result<T, GitHubError>;
