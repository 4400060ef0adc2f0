//! Error types for the occupancy core.
//!
//! [`OccupancyError`] is the top-level error; [`ValidationError`] is used for rejected snapshots.

use thiserror::Error;

/// Top-level error for the tracker (validation, lookups, storage, dependencies, config, IO).
#[derive(Error, Debug)]
pub enum OccupancyError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Stats for user {user_id} in group {group_id} are still being computed")]
    StillComputing { group_id: String, user_id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons an ingest payload is rejected before any state is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Group id is empty")]
    EmptyGroupId,

    #[error("Room id is empty")]
    EmptyRoomId,

    #[error("Member id is empty in room {0}")]
    EmptyMemberId(String),

    #[error("Room {0} appears more than once")]
    DuplicateRoom(String),

    #[error("Member {member_id} appears in rooms {first_room} and {second_room}")]
    MemberInSeveralRooms {
        member_id: String,
        first_room: String,
        second_room: String,
    },
}

/// Result type for core operations; uses [`OccupancyError`].
pub type Result<T> = std::result::Result<T, OccupancyError>;
