use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid task id: {0} (expected T<PP>-<NNN>)")]
    InvalidTaskId(String),

    #[error("Invalid phase id: {0} (expected p<PP>)")]
    InvalidPhaseId(String),

    #[error("Invalid estimate: {0} (expected \"Nh\", \"Nd\" or hours)")]
    InvalidEstimate(String),

    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
