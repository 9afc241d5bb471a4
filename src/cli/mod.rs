//! Command-line interface for bashloop.
//!
//! Provides the `run` command that drives one agent run and the `config`
//! command that prints the default configuration.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
