//! Session repository: persisted session history per group.
//!
//! Sessions live in `sessions` (rooms as JSON); `session_members` indexes who was in which room
//! so per-user lookups and the room directory do not scan every session document.

use crate::error::StorageError;
use crate::models::{SessionQuery, SessionRow};
use crate::repository::{SessionStore, SessionTransition};
use crate::sqlite_pool::SqlitePoolManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use occupancy_core::{RoomInfo, Session};
use sqlx::{Sqlite, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, info};

const SESSION_COLUMNS: &str = "id, group_id, start_ms, end_ms, rooms_json";

#[derive(Clone)]
pub struct SessionRepository {
    pool_manager: SqlitePoolManager,
}

impl SessionRepository {
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let pool_manager = SqlitePoolManager::new(database_url).await?;
        Self::with_pool(pool_manager).await
    }

    /// Builds the repository on an existing pool (shared with [`crate::StatsRepository`]).
    pub async fn with_pool(pool_manager: SqlitePoolManager) -> Result<Self, StorageError> {
        let repo = Self { pool_manager };
        repo.init().await?;
        Ok(repo)
    }

    async fn init(&self) -> Result<(), StorageError> {
        info!("Creating session tables if not exist");

        let pool = self.pool_manager.pool();

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms INTEGER,
                rooms_json TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_members (
                session_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                room_id TEXT NOT NULL,
                room_name TEXT NOT NULL,
                PRIMARY KEY (session_id, user_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_group_start ON sessions(group_id, start_ms)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_open ON sessions(end_ms) WHERE end_ms IS NULL")
            .execute(pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_session_members_group_user ON session_members(group_id, user_id)",
        )
        .execute(pool)
        .await?;

        info!("Session tables created successfully");
        Ok(())
    }

    async fn insert_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        session: &Session,
    ) -> Result<(), StorageError> {
        let row = SessionRow::from_session(session)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO sessions (id, group_id, start_ms, end_ms, rooms_json)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.group_id)
        .bind(row.start_ms)
        .bind(row.end_ms)
        .bind(&row.rooms_json)
        .execute(&mut **tx)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &inserted {
            if db_err.is_unique_violation() {
                return Err(StorageError::Conflict(format!("session {} already exists", row.id)));
            }
        }
        inserted?;

        for room in &session.rooms {
            for member in &room.members {
                sqlx::query(
                    r#"
                    INSERT INTO session_members (session_id, group_id, user_id, room_id, room_name)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&session.id)
                .bind(&session.group_id)
                .bind(&member.user_id)
                .bind(&room.room_id)
                .bind(&room.room_name)
                .execute(&mut **tx)
                .await?;
            }
        }

        Ok(())
    }

    fn into_sessions(rows: Vec<SessionRow>) -> Result<Vec<Session>, StorageError> {
        rows.into_iter().map(SessionRow::into_session).collect()
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn latest_session(&self, group_id: &str) -> Result<Option<Session>, StorageError> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE group_id = ? ORDER BY start_ms DESC, rowid DESC LIMIT 1",
            SESSION_COLUMNS
        );
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(group_id)
            .fetch_optional(self.pool_manager.pool())
            .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn record_transition(&self, transition: &SessionTransition) -> Result<(), StorageError> {
        if transition.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool_manager.pool().begin().await?;

        for close in transition.repairs.iter().chain(transition.close.iter()) {
            let result = sqlx::query("UPDATE sessions SET end_ms = ? WHERE id = ? AND end_ms IS NULL")
                .bind(close.end.timestamp_millis())
                .bind(&close.session_id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StorageError::Conflict(format!(
                    "session {} is no longer open",
                    close.session_id
                )));
            }
        }

        if let Some(open) = &transition.open {
            let open_count: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM sessions WHERE group_id = ? AND end_ms IS NULL")
                    .bind(&transition.group_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if open_count.0 > 0 {
                return Err(StorageError::Conflict(format!(
                    "group {} already has an open session",
                    transition.group_id
                )));
            }
            Self::insert_in_tx(&mut tx, open).await?;
        }

        tx.commit().await?;

        debug!(
            group_id = %transition.group_id,
            closed = ?transition.close.as_ref().map(|c| c.session_id.as_str()),
            opened = ?transition.open.as_ref().map(|s| s.id.as_str()),
            repaired = transition.repairs.len(),
            "Recorded session transition"
        );
        Ok(())
    }

    async fn close_session(&self, session_id: &str, end: DateTime<Utc>) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE sessions SET end_ms = ? WHERE id = ? AND end_ms IS NULL")
            .bind(end.timestamp_millis())
            .bind(session_id)
            .execute(self.pool_manager.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut tx = self.pool_manager.pool().begin().await?;
        Self::insert_in_tx(&mut tx, session).await?;
        tx.commit().await?;

        info!(
            session_id = %session.id,
            group_id = %session.group_id,
            open = session.is_open(),
            "Imported session"
        );
        Ok(())
    }

    async fn open_sessions(&self) -> Result<Vec<Session>, StorageError> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE end_ms IS NULL ORDER BY start_ms DESC, rowid DESC",
            SESSION_COLUMNS
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&sql)
            .fetch_all(self.pool_manager.pool())
            .await?;

        Self::into_sessions(rows)
    }

    async fn open_sessions_in_group(&self, group_id: &str) -> Result<Vec<Session>, StorageError> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE group_id = ? AND end_ms IS NULL ORDER BY start_ms ASC, rowid ASC",
            SESSION_COLUMNS
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&sql)
            .bind(group_id)
            .fetch_all(self.pool_manager.pool())
            .await?;

        Self::into_sessions(rows)
    }

    async fn successor_of(&self, session: &Session) -> Result<Option<Session>, StorageError> {
        let sql = format!(
            r#"
            SELECT {} FROM sessions
            WHERE group_id = ? AND id != ?
              AND (start_ms > ?
                   OR (start_ms = ? AND rowid > (SELECT rowid FROM sessions WHERE id = ?)))
            ORDER BY start_ms ASC, rowid ASC
            LIMIT 1
            "#,
            SESSION_COLUMNS
        );
        let start_ms = session.start.timestamp_millis();
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(&session.group_id)
            .bind(&session.id)
            .bind(start_ms)
            .bind(start_ms)
            .bind(&session.id)
            .fetch_optional(self.pool_manager.pool())
            .await?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StorageError> {
        let mut sql = format!("SELECT {} FROM sessions WHERE group_id = ?", SESSION_COLUMNS);

        if query.from.is_some() {
            sql.push_str(" AND start_ms >= ?");
        }
        if query.to.is_some() {
            sql.push_str(" AND start_ms <= ?");
        }

        sql.push_str(" ORDER BY start_ms ASC, rowid ASC");

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut query_builder = sqlx::query_as::<_, SessionRow>(&sql).bind(&query.group_id);
        if let Some(from) = query.from {
            query_builder = query_builder.bind(from.timestamp_millis());
        }
        if let Some(to) = query.to {
            query_builder = query_builder.bind(to.timestamp_millis());
        }

        let rows = query_builder.fetch_all(self.pool_manager.pool()).await?;
        debug!(group_id = %query.group_id, count = rows.len(), "Retrieved sessions");

        Self::into_sessions(rows)
    }

    async fn sessions_for_user(&self, group_id: &str, user_id: &str) -> Result<Vec<Session>, StorageError> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.group_id, s.start_ms, s.end_ms, s.rooms_json
            FROM sessions s
            JOIN session_members m ON m.session_id = s.id
            WHERE m.group_id = ? AND m.user_id = ?
            ORDER BY s.start_ms ASC, s.rowid ASC
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_all(self.pool_manager.pool())
        .await?;

        Self::into_sessions(rows)
    }

    async fn user_ids(&self, group_id: &str) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT user_id FROM session_members WHERE group_id = ? ORDER BY user_id",
        )
        .bind(group_id)
        .fetch_all(self.pool_manager.pool())
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn has_user_sessions(&self, group_id: &str, user_id: &str) -> Result<bool, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM session_members WHERE group_id = ? AND user_id = ? LIMIT 1",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(self.pool_manager.pool())
        .await?;

        Ok(row.is_some())
    }

    async fn rooms(&self, group_id: &str) -> Result<Vec<RoomInfo>, StorageError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT m.room_id, m.room_name
            FROM session_members m
            JOIN sessions s ON s.id = m.session_id
            WHERE m.group_id = ?
            ORDER BY s.start_ms DESC, s.rowid DESC
            "#,
        )
        .bind(group_id)
        .fetch_all(self.pool_manager.pool())
        .await?;

        // newest first, so the first name seen per room wins
        let mut latest: BTreeMap<String, String> = BTreeMap::new();
        for (room_id, room_name) in rows {
            latest.entry(room_id).or_insert(room_name);
        }

        Ok(latest
            .into_iter()
            .map(|(room_id, room_name)| RoomInfo { room_id, room_name })
            .collect())
    }
}
