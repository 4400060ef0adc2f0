//! Tracing initialization: one fmt layer teed to stdout and an append-mode log file.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{
    fmt::writer::MakeWriterExt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Filter used when RUST_LOG is unset; sqlx statement logging is kept at warn.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Opens `path` for appending, creating missing parent directories.
pub fn open_log_file(path: &str) -> io::Result<File> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Initializes the global tracing subscriber.
/// The level comes from RUST_LOG and defaults to [`DEFAULT_FILTER`].
/// Load .env (dotenvy::dotenv()) before calling this, otherwise RUST_LOG from .env is ignored.
pub fn init_tracing(log_file_path: &str) -> anyhow::Result<()> {
    let file = Arc::new(open_log_file(log_file_path)?);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout.and(file))
        .with_target(true)
        .with_level(true)
        .with_ansi(false);

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set global subscriber: {}", e))?;

    Ok(())
}
