//! Store traits used by the tracker. The SQLite repositories implement them; tests may provide fakes.

use crate::error::StorageError;
use crate::models::SessionQuery;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use occupancy_core::{RoomInfo, Session, UserStats};

/// Closes `session_id` at `end`, provided it is still open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSession {
    pub session_id: String,
    pub end: DateTime<Utc>,
}

/// A detector decision applied atomically: optionally close the current session, optionally open a new one.
/// `repairs` closes older sessions of the group that were left open next to the current one.
#[derive(Debug, Clone, Default)]
pub struct SessionTransition {
    pub group_id: String,
    pub repairs: Vec<CloseSession>,
    pub close: Option<CloseSession>,
    pub open: Option<Session>,
}

impl SessionTransition {
    pub fn is_empty(&self) -> bool {
        self.repairs.is_empty() && self.close.is_none() && self.open.is_none()
    }
}

/// Ordered session history per group.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Most recent session of the group (by start), open or closed.
    async fn latest_session(&self, group_id: &str) -> Result<Option<Session>, StorageError>;

    /// Applies a transition in one transaction: repairs, then close, then open. Fails with
    /// [`StorageError::Conflict`] when a session to close is no longer open, or when opening while
    /// another session of the group is still open.
    async fn record_transition(&self, transition: &SessionTransition) -> Result<(), StorageError>;

    /// Compare-and-swap close; returns false when the session was already closed or does not exist.
    async fn close_session(&self, session_id: &str, end: DateTime<Utc>) -> Result<bool, StorageError>;

    /// Inserts a fully formed session (history import). Bypasses the open-session check.
    async fn insert_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Open sessions of all groups, newest first.
    async fn open_sessions(&self) -> Result<Vec<Session>, StorageError>;

    /// Open sessions of one group, oldest first. More than one means a duplicate open.
    async fn open_sessions_in_group(&self, group_id: &str) -> Result<Vec<Session>, StorageError>;

    /// The next session of the same group after `session`, if any.
    async fn successor_of(&self, session: &Session) -> Result<Option<Session>, StorageError>;

    /// Sessions matching the query, ascending by start.
    async fn sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StorageError>;

    /// Every session of the group that contains the user, ascending by start.
    async fn sessions_for_user(&self, group_id: &str, user_id: &str) -> Result<Vec<Session>, StorageError>;

    /// Users with at least one session in the group, sorted.
    async fn user_ids(&self, group_id: &str) -> Result<Vec<String>, StorageError>;

    async fn has_user_sessions(&self, group_id: &str, user_id: &str) -> Result<bool, StorageError>;

    /// Distinct rooms seen for the group with their most recent names, sorted by room id.
    async fn rooms(&self, group_id: &str) -> Result<Vec<RoomInfo>, StorageError>;
}

/// One stats document per (group, user), always replaced as a whole.
#[async_trait]
pub trait UserStatsStore: Send + Sync {
    async fn upsert(&self, stats: &UserStats) -> Result<(), StorageError>;

    async fn get(&self, group_id: &str, user_id: &str) -> Result<Option<UserStats>, StorageError>;

    /// Removes every stats document of the group; returns how many were deleted.
    async fn delete_for_group(&self, group_id: &str) -> Result<u64, StorageError>;
}
