//! # occupancy-cli
//!
//! Argument parsing, config loading and the stdin snapshot driver behind the `occupancy` binary.

pub mod cli;
pub mod serve;

pub use cli::{load_config, Cli, Commands};
pub use serve::{ingest_lines, ServeSummary, SnapshotLine};
