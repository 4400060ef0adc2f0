//! Stats repository: one stats document per (group, user).

use crate::error::StorageError;
use crate::models::UserStatsRow;
use crate::repository::UserStatsStore;
use crate::sqlite_pool::SqlitePoolManager;
use async_trait::async_trait;
use occupancy_core::UserStats;
use tracing::{debug, info};

#[derive(Clone)]
pub struct StatsRepository {
    pool_manager: SqlitePoolManager,
}

impl StatsRepository {
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let pool_manager = SqlitePoolManager::new(database_url).await?;
        Self::with_pool(pool_manager).await
    }

    pub async fn with_pool(pool_manager: SqlitePoolManager) -> Result<Self, StorageError> {
        let repo = Self { pool_manager };
        repo.init().await?;
        Ok(repo)
    }

    async fn init(&self) -> Result<(), StorageError> {
        info!("Creating user_stats table if not exist");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_stats (
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                username TEXT NOT NULL,
                identity_resolved INTEGER NOT NULL,
                avatar_url TEXT,
                stats_json TEXT NOT NULL,
                last_updated_ms INTEGER NOT NULL,
                PRIMARY KEY (group_id, user_id)
            )
            "#,
        )
        .execute(self.pool_manager.pool())
        .await?;

        Ok(())
    }
}

#[async_trait]
impl UserStatsStore for StatsRepository {
    async fn upsert(&self, stats: &UserStats) -> Result<(), StorageError> {
        let row = UserStatsRow::from_stats(stats)?;

        sqlx::query(
            r#"
            INSERT INTO user_stats
                (group_id, user_id, username, identity_resolved, avatar_url, stats_json, last_updated_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(group_id, user_id) DO UPDATE SET
                username = excluded.username,
                identity_resolved = excluded.identity_resolved,
                avatar_url = excluded.avatar_url,
                stats_json = excluded.stats_json,
                last_updated_ms = excluded.last_updated_ms
            "#,
        )
        .bind(&row.group_id)
        .bind(&row.user_id)
        .bind(&row.username)
        .bind(row.identity_resolved)
        .bind(&row.avatar_url)
        .bind(&row.stats_json)
        .bind(row.last_updated_ms)
        .execute(self.pool_manager.pool())
        .await?;

        debug!(group_id = %row.group_id, user_id = %row.user_id, "Saved user stats");
        Ok(())
    }

    async fn get(&self, group_id: &str, user_id: &str) -> Result<Option<UserStats>, StorageError> {
        let row: Option<UserStatsRow> = sqlx::query_as(
            r#"
            SELECT group_id, user_id, username, identity_resolved, avatar_url, stats_json, last_updated_ms
            FROM user_stats
            WHERE group_id = ? AND user_id = ?
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(self.pool_manager.pool())
        .await?;

        row.map(UserStatsRow::into_stats).transpose()
    }

    async fn delete_for_group(&self, group_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM user_stats WHERE group_id = ?")
            .bind(group_id)
            .execute(self.pool_manager.pool())
            .await?;

        info!(group_id = %group_id, deleted = result.rows_affected(), "Deleted group stats");
        Ok(result.rows_affected())
    }
}
