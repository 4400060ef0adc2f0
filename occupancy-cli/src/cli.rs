//! CLI parser and config loading.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use occupancy_core::TrackerConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "occupancy")]
#[command(about = "Room occupancy tracker: ingest snapshots, query sessions and stats", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Overrides DATABASE_URL.
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest newline-delimited JSON snapshots from stdin and run the cleanup sweeper.
    Serve,
    /// Ingest one `{"rooms": [...]}` payload for a group.
    Ingest {
        #[arg(short, long)]
        group: String,
        /// Payload file; stdin when omitted.
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Snapshot time (RFC 3339); now when omitted.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Print the sessions of a group, optionally restricted to a start-time range.
    Sessions {
        #[arg(short, long)]
        group: String,
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Print one user's stats document, computing it if needed.
    Stats {
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        user: String,
    },
    /// Recompute stats for a group or one user and wait for the result.
    Recompute {
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        user: Option<String>,
        /// Delete the group's stats first and rebuild everything.
        #[arg(long, conflicts_with = "user")]
        reset: bool,
    },
    /// Run one cleanup pass and print the report.
    Sweep,
    /// Print the rooms seen for a group with their latest names.
    Rooms {
        #[arg(short, long)]
        group: String,
    },
}

/// Load TrackerConfig from environment. If `database_url` is provided it overrides DATABASE_URL.
pub fn load_config(database_url: Option<String>) -> Result<TrackerConfig> {
    let mut config = TrackerConfig::load().context("Load tracker config from environment")?;
    if let Some(url) = database_url {
        config.database_url = url;
    }
    config.validate().context("Validate tracker config")?;
    Ok(config)
}
