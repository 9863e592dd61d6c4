mod error;
pub mod models;
mod pool;
pub mod repositories;

pub use error::*;
pub use models::{CheckpointRow, SessionRow};
pub use pool::*;
pub use repositories::*;
