mod session;

pub use session::{CheckpointRow, SessionRow};
