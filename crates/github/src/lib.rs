pub mod error;
pub mod gh_cli;
pub mod types;

pub use error::{GitHubError, Result};
pub use gh_cli::GhCli;
pub use types::{PrSpec, PullRequest};
