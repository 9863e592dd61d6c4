use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),
}

pub type Result<T> = std::result::Result<T, SpecsError>;
