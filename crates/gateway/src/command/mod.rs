//! Shell command execution.

pub mod runner;

pub use runner::{default_shell, CommandRunner, TIMEOUT_EXIT_CODE};
