//! I/O helpers for pipeline stages and the CLI.

pub mod artifacts;
pub mod config;
pub mod init;
pub mod instructions;
pub mod invoker;
pub mod process;
pub mod prompt;
