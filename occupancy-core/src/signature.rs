//! Canonical form of a room-membership state, used to decide whether a snapshot changes anything.
//!
//! Snapshot rooms and persisted session rooms normalize through the same code path, so equal
//! compositions always yield equal [`StateSignature`]s regardless of input order.

use crate::types::{RoomSnapshot, SessionRoom};
use std::fmt;

/// Rooms with at least one member, members sorted and deduplicated, rooms sorted by id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedState {
    rooms: Vec<(String, Vec<String>)>,
}

impl NormalizedState {
    fn from_pairs(pairs: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        let mut rooms: Vec<(String, Vec<String>)> = pairs
            .into_iter()
            .map(|(room_id, mut members)| {
                members.sort();
                members.dedup();
                (room_id, members)
            })
            .filter(|(_, members)| !members.is_empty())
            .collect();
        rooms.sort_by(|a, b| a.0.cmp(&b.0));
        Self { rooms }
    }

    pub fn from_snapshot_rooms(rooms: &[RoomSnapshot]) -> Self {
        Self::from_pairs(rooms.iter().map(|room| {
            (
                room.room_id.clone(),
                room.members.iter().map(|m| m.member_id.clone()).collect(),
            )
        }))
    }

    pub fn from_session_rooms(rooms: &[SessionRoom]) -> Self {
        Self::from_pairs(rooms.iter().map(|room| {
            (
                room.room_id.clone(),
                room.members.iter().map(|m| m.user_id.clone()).collect(),
            )
        }))
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Ids of the non-empty rooms, in canonical order.
    pub fn room_ids(&self) -> impl Iterator<Item = &str> {
        self.rooms.iter().map(|(id, _)| id.as_str())
    }

    pub fn signature(&self) -> StateSignature {
        // [[roomId, [memberId, ...]], ...]
        let encoded = serde_json::to_string(&self.rooms).unwrap_or_default();
        StateSignature(encoded)
    }
}

/// Serialized [`NormalizedState`]; compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateSignature(String);

impl StateSignature {
    /// Signature of a state with no occupied room.
    pub fn empty() -> Self {
        NormalizedState::default().signature()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
