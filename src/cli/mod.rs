//! Command-line interface for delayq.
//!
//! Provides commands for enqueueing tasks, running a worker, and inspecting
//! or recovering a queue's stored tasks.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
