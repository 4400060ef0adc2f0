//! occupancy CLI: serve a snapshot stream, ingest payloads, query sessions/stats/rooms, trigger
//! recomputation and cleanup. Config from env and optional CLI args.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use occupancy_cli::{ingest_lines, load_config, Cli, Commands};
use occupancy_core::{init_tracing, OccupancyError, TrackerConfig};
use occupancy_tracker::{OccupancyTracker, RecomputeJob};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(cli.database_url)?;
    init_tracing(&config.log_file)?;

    let tracker = OccupancyTracker::open(config.clone())
        .await
        .with_context(|| format!("Open database {}", config.database_url))?;

    match cli.command {
        Commands::Serve => handle_serve(&tracker, &config).await,
        Commands::Ingest { group, file, at } => handle_ingest(&tracker, &group, file, at).await,
        Commands::Sessions { group, from, to } => {
            print_json(&tracker.list_sessions(&group, from, to).await?)
        }
        Commands::Stats { group, user } => handle_stats(&tracker, &group, &user).await,
        Commands::Recompute { group, user, reset } => {
            let job = match (user, reset) {
                (_, true) => RecomputeJob::reset(&group),
                (Some(user), false) => RecomputeJob::users(&group, vec![user]),
                (None, false) => RecomputeJob::group(&group),
            };
            print_json(&tracker.recompute_now(&job).await?)
        }
        Commands::Sweep => print_json(&tracker.sweep_now().await?),
        Commands::Rooms { group } => print_json(&tracker.list_rooms(&group).await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Handle the serve command.
///
/// Starts the cleanup sweeper, ingests stdin lines until EOF or Ctrl-C, then waits for queued
/// recomputes before exiting.
async fn handle_serve(tracker: &OccupancyTracker, config: &TrackerConfig) -> Result<()> {
    info!(
        database_url = %config.database_url,
        cleanup_interval_ms = config.cleanup_interval_ms,
        stale_timeout_ms = config.stale_timeout_ms,
        "Serving snapshots from stdin"
    );
    let sweeper = tracker.start_sweeper();

    let reader = BufReader::new(tokio::io::stdin());
    let summary = tokio::select! {
        summary = ingest_lines(tracker, reader) => Some(summary?),
        _ = tokio::signal::ctrl_c() => None,
    };

    sweeper.stop();
    tracker.flush_recomputes().await;

    match summary {
        Some(summary) => info!(ingested = summary.ingested, rejected = summary.rejected, "Input ended"),
        None => info!("Interrupted"),
    }
    Ok(())
}

async fn handle_ingest(
    tracker: &OccupancyTracker,
    group: &str,
    file: Option<PathBuf>,
    at: Option<chrono::DateTime<Utc>>,
) -> Result<()> {
    let payload = match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Read payload file {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Read payload from stdin")?;
            buf
        }
    };

    let report = tracker
        .ingest_json(group, &payload, at.unwrap_or_else(Utc::now))
        .await?;
    tracker.flush_recomputes().await;
    print_json(&report)
}

async fn handle_stats(tracker: &OccupancyTracker, group: &str, user: &str) -> Result<()> {
    match tracker.get_user_stats(group, user).await {
        Ok(stats) => print_json(&stats),
        Err(OccupancyError::NotFound(_)) => {
            anyhow::bail!("User {} has no sessions in group {}", user, group)
        }
        Err(e) => Err(e.into()),
    }
}
