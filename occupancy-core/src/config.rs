//! Tracker configuration: database, logging, sweeper thresholds, stats options. Loaded from env.

use crate::error::{OccupancyError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Runtime configuration for the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// DATABASE_URL (SQLite file path or `sqlite::memory:`)
    pub database_url: String,
    /// LOG_FILE
    pub log_file: String,
    /// CLEANUP_INTERVAL_MS: sweeper cadence
    pub cleanup_interval_ms: u64,
    /// STALE_TIMEOUT_MS: session age after which the sweeper may close it
    pub stale_timeout_ms: u64,
    /// MIN_SESSION_AGE_MS: sessions younger than this are never touched by the sweeper
    pub min_session_age_ms: u64,
    /// EXCLUDED_ROOM_ID: room whose time is counted as away time only
    pub excluded_room_id: Option<String>,
    /// STATS_POLL_ATTEMPTS: reads of a missing stats document before giving up
    pub stats_poll_attempts: u32,
    /// STATS_POLL_INTERVAL_MS
    pub stats_poll_interval_ms: u64,
    /// ROUND_TO_MINUTE: truncate snapshot timestamps to the minute
    pub round_to_minute: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            database_url: "./occupancy.db".to_string(),
            log_file: "logs/occupancy.log".to_string(),
            cleanup_interval_ms: 2 * 60 * 1000,
            stale_timeout_ms: 5 * 60 * 1000,
            min_session_age_ms: 3 * 60 * 1000,
            excluded_room_id: None,
            stats_poll_attempts: 5,
            stats_poll_interval_ms: 500,
            round_to_minute: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| OccupancyError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

impl TrackerConfig {
    /// Load from environment variables; unset variables fall back to [`TrackerConfig::default`].
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let database_url = env::var("DATABASE_URL").unwrap_or(defaults.database_url);
        let log_file = env::var("LOG_FILE").unwrap_or(defaults.log_file);
        let excluded_room_id = env::var("EXCLUDED_ROOM_ID")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            database_url,
            log_file,
            cleanup_interval_ms: env_parse("CLEANUP_INTERVAL_MS", defaults.cleanup_interval_ms)?,
            stale_timeout_ms: env_parse("STALE_TIMEOUT_MS", defaults.stale_timeout_ms)?,
            min_session_age_ms: env_parse("MIN_SESSION_AGE_MS", defaults.min_session_age_ms)?,
            excluded_room_id,
            stats_poll_attempts: env_parse("STATS_POLL_ATTEMPTS", defaults.stats_poll_attempts)?,
            stats_poll_interval_ms: env_parse(
                "STATS_POLL_INTERVAL_MS",
                defaults.stats_poll_interval_ms,
            )?,
            round_to_minute: env_parse("ROUND_TO_MINUTE", defaults.round_to_minute)?,
        })
    }

    /// Rejects zero intervals, timeouts and poll attempts.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(OccupancyError::Config("DATABASE_URL is empty".to_string()));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(OccupancyError::Config(
                "CLEANUP_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }
        if self.stale_timeout_ms == 0 {
            return Err(OccupancyError::Config(
                "STALE_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }
        if self.stats_poll_attempts == 0 {
            return Err(OccupancyError::Config(
                "STATS_POLL_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn stats_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stats_poll_interval_ms)
    }

    pub fn stale_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.stale_timeout_ms as i64)
    }

    pub fn min_session_age(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.min_session_age_ms as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 9] = [
        "DATABASE_URL",
        "LOG_FILE",
        "CLEANUP_INTERVAL_MS",
        "STALE_TIMEOUT_MS",
        "MIN_SESSION_AGE_MS",
        "EXCLUDED_ROOM_ID",
        "STATS_POLL_ATTEMPTS",
        "STATS_POLL_INTERVAL_MS",
        "ROUND_TO_MINUTE",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_load_config_with_defaults() {
        clear_env();

        let config = TrackerConfig::load().unwrap();

        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.database_url, "./occupancy.db");
        assert_eq!(config.log_file, "logs/occupancy.log");
        assert_eq!(config.cleanup_interval_ms, 120_000);
        assert_eq!(config.stale_timeout_ms, 300_000);
        assert_eq!(config.min_session_age_ms, 180_000);
        assert!(config.excluded_room_id.is_none());
        assert!(config.round_to_minute);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_config_with_custom_values() {
        clear_env();
        env::set_var("DATABASE_URL", "sqlite::memory:");
        env::set_var("CLEANUP_INTERVAL_MS", "1000");
        env::set_var("STALE_TIMEOUT_MS", "60000");
        env::set_var("MIN_SESSION_AGE_MS", "0");
        env::set_var("EXCLUDED_ROOM_ID", "afk-room");
        env::set_var("ROUND_TO_MINUTE", "false");

        let config = TrackerConfig::load().unwrap();
        clear_env();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.cleanup_interval_ms, 1000);
        assert_eq!(config.stale_timeout_ms, 60_000);
        assert_eq!(config.min_session_age_ms, 0);
        assert_eq!(config.excluded_room_id.as_deref(), Some("afk-room"));
        assert!(!config.round_to_minute);
    }

    #[test]
    #[serial]
    fn test_load_config_rejects_unparsable_number() {
        clear_env();
        env::set_var("STALE_TIMEOUT_MS", "five minutes");

        let result = TrackerConfig::load();
        clear_env();

        assert!(matches!(result, Err(OccupancyError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = TrackerConfig {
            cleanup_interval_ms: 0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TrackerConfig {
            stats_poll_attempts: 0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_camel_case_options() {
        let config: TrackerConfig = serde_json::from_str(
            r#"{"cleanupIntervalMs": 5000, "staleTimeoutMs": 10000, "minSessionAgeMs": 2000, "excludedRoomId": "afk"}"#,
        )
        .unwrap();
        assert_eq!(config.cleanup_interval_ms, 5000);
        assert_eq!(config.stale_timeout_ms, 10_000);
        assert_eq!(config.min_session_age_ms, 2000);
        assert_eq!(config.excluded_room_id.as_deref(), Some("afk"));
        assert_eq!(config.stats_poll_attempts, 5);
    }
}
