//! Command-line interface for wiki_forge.
//!
//! Provides commands for running a generation job from the terminal and for
//! inspecting the configured credential pool.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
