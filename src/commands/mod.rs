pub mod check;
pub mod common;
pub mod project;
pub mod workspace;

// Re-export command functions
pub use check::{cmd_check, cmd_target};
pub use project::cmd_project;
pub use workspace::cmd_workspace;
