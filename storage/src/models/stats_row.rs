use crate::error::StorageError;
use occupancy_core::time::from_millis;
use occupancy_core::{PeriodBuckets, UserStats};
use sqlx::FromRow;

/// One row of the `user_stats` table; the period buckets are stored as a JSON document.
#[derive(Debug, Clone, FromRow)]
pub struct UserStatsRow {
    pub group_id: String,
    pub user_id: String,
    pub username: String,
    pub identity_resolved: bool,
    pub avatar_url: Option<String>,
    pub stats_json: String,
    pub last_updated_ms: i64,
}

impl UserStatsRow {
    pub fn from_stats(stats: &UserStats) -> Result<Self, StorageError> {
        Ok(Self {
            group_id: stats.group_id.clone(),
            user_id: stats.user_id.clone(),
            username: stats.username.clone(),
            identity_resolved: stats.identity_resolved,
            avatar_url: stats.avatar_url.clone(),
            stats_json: serde_json::to_string(&stats.stats)?,
            last_updated_ms: stats.last_updated_at.timestamp_millis(),
        })
    }

    pub fn into_stats(self) -> Result<UserStats, StorageError> {
        let stats: PeriodBuckets = serde_json::from_str(&self.stats_json)?;
        let last_updated_at = from_millis(self.last_updated_ms).ok_or_else(|| {
            StorageError::Serialization(format!(
                "stats for {}/{} have an invalid timestamp: {}",
                self.group_id, self.user_id, self.last_updated_ms
            ))
        })?;

        Ok(UserStats {
            group_id: self.group_id,
            user_id: self.user_id,
            username: self.username,
            identity_resolved: self.identity_resolved,
            avatar_url: self.avatar_url,
            stats,
            last_updated_at,
        })
    }
}
