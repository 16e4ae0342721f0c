//! Tooling
//!
//! Command-line surface over the tracking manager.

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
