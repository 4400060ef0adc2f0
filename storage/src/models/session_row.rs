//! Persisted form of a session.

use crate::error::StorageError;
use occupancy_core::time::from_millis;
use occupancy_core::{Session, SessionRoom};
use sqlx::FromRow;

/// One row of the `sessions` table. Times are epoch milliseconds; rooms are JSON.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub group_id: String,
    pub start_ms: i64,
    pub end_ms: Option<i64>,
    pub rooms_json: String,
}

impl SessionRow {
    pub fn from_session(session: &Session) -> Result<Self, StorageError> {
        Ok(Self {
            id: session.id.clone(),
            group_id: session.group_id.clone(),
            start_ms: session.start.timestamp_millis(),
            end_ms: session.end.map(|end| end.timestamp_millis()),
            rooms_json: serde_json::to_string(&session.rooms)?,
        })
    }

    pub fn into_session(self) -> Result<Session, StorageError> {
        let start = from_millis(self.start_ms).ok_or_else(|| {
            StorageError::Serialization(format!(
                "session {} has an invalid start: {}",
                self.id, self.start_ms
            ))
        })?;
        let end = match self.end_ms {
            Some(ms) => Some(from_millis(ms).ok_or_else(|| {
                StorageError::Serialization(format!("session {} has an invalid end: {}", self.id, ms))
            })?),
            None => None,
        };
        let rooms: Vec<SessionRoom> = serde_json::from_str(&self.rooms_json)?;

        Ok(Session {
            id: self.id,
            group_id: self.group_id,
            start,
            end,
            rooms,
        })
    }
}
