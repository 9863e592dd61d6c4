pub mod domain;
pub mod error;

pub use domain::ids::{PhaseId, TaskId};
pub use domain::session::{
    Checkpoint, CheckpointStatus, Session, TaskErrorRecord,
};
pub use domain::task::{Estimate, Priority, Task, TaskStatus};
pub use error::{CoreError, Result};
