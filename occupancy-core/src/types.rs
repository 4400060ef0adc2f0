//! Core types: snapshots (input), sessions (persisted history), user stats and room directory entries.

use crate::error::ValidationError;
use crate::time::TimeWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// A member reported in a room by the presence source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    #[serde(alias = "userId")]
    pub member_id: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// One room of a snapshot with the members currently in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    #[serde(alias = "channelId")]
    pub room_id: String,
    #[serde(default, alias = "channelName")]
    pub room_name: Option<String>,
    pub members: Vec<MemberSnapshot>,
}

/// Wire shape of an ingest request body: `{"rooms": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPayload {
    #[serde(alias = "channels")]
    pub rooms: Vec<RoomSnapshot>,
}

/// Point-in-time report of who occupies which room of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub rooms: Vec<RoomSnapshot>,
}

impl Snapshot {
    pub fn new(taken_at: DateTime<Utc>, rooms: Vec<RoomSnapshot>) -> Self {
        Self { taken_at, rooms }
    }

    /// Parses a raw ingest body. Any shape error (rooms not a list, member without id, ...) is a
    /// [`ValidationError::Malformed`].
    pub fn from_json(payload: &str, taken_at: DateTime<Utc>) -> Result<Self, ValidationError> {
        let payload: IngestPayload = serde_json::from_str(payload)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Ok(Self::new(taken_at, payload.rooms))
    }

    /// Structural checks that serde cannot express. Empty rooms are allowed (they are dropped by normalization).
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen_rooms: BTreeSet<&str> = BTreeSet::new();
        let mut member_rooms: HashMap<&str, &str> = HashMap::new();

        for room in &self.rooms {
            if room.room_id.trim().is_empty() {
                return Err(ValidationError::EmptyRoomId);
            }
            if !seen_rooms.insert(room.room_id.as_str()) {
                return Err(ValidationError::DuplicateRoom(room.room_id.clone()));
            }
            for member in &room.members {
                if member.member_id.trim().is_empty() {
                    return Err(ValidationError::EmptyMemberId(room.room_id.clone()));
                }
                match member_rooms.get(member.member_id.as_str()) {
                    Some(first) if *first != room.room_id.as_str() => {
                        return Err(ValidationError::MemberInSeveralRooms {
                            member_id: member.member_id.clone(),
                            first_room: first.to_string(),
                            second_room: room.room_id.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        member_rooms.insert(member.member_id.as_str(), room.room_id.as_str());
                    }
                }
            }
        }
        Ok(())
    }
}

/// A member as recorded in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMember {
    pub user_id: String,
    pub username: String,
}

/// A non-empty room as recorded in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRoom {
    pub room_id: String,
    pub room_name: String,
    pub members: Vec<SessionMember>,
}

impl SessionRoom {
    /// Builds the persisted form of a snapshot room: members deduplicated and sorted by id,
    /// default names filled in.
    pub fn from_snapshot(room: &RoomSnapshot) -> Self {
        let mut members: Vec<SessionMember> = Vec::with_capacity(room.members.len());
        for member in &room.members {
            if members.iter().any(|m| m.user_id == member.member_id) {
                continue;
            }
            members.push(SessionMember {
                user_id: member.member_id.clone(),
                username: member
                    .username
                    .clone()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| default_username(&member.member_id)),
            });
        }
        members.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        Self {
            room_id: room.room_id.clone(),
            room_name: room
                .room_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| format!("Room {}", room.room_id)),
            members,
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }
}

/// Placeholder display name for a user whose name is unknown.
pub fn default_username(user_id: &str) -> String {
    format!("User {}", user_id)
}

/// One contiguous interval during which a room-membership configuration held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub group_id: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub rooms: Vec<SessionRoom>,
}

impl Session {
    /// Creates an open session with a generated id. Empty rooms are dropped and rooms are sorted by id.
    pub fn open(group_id: &str, start: DateTime<Utc>, rooms: Vec<SessionRoom>) -> Self {
        let mut rooms: Vec<SessionRoom> = rooms.into_iter().filter(|r| !r.members.is_empty()).collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        Self {
            id: Uuid::new_v4().to_string(),
            group_id: group_id.to_string(),
            start,
            end: None,
            rooms,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Length of a closed session; `None` while open.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end.map(|end| end - self.start)
    }

    /// End used for accounting: the recorded end, or `now` while the session is open.
    pub fn effective_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.end.unwrap_or(now)
    }

    /// Accounted length in milliseconds, never negative.
    pub fn duration_ms_at(&self, now: DateTime<Utc>) -> i64 {
        (self.effective_end(now) - self.start).num_milliseconds().max(0)
    }

    /// The room the user occupied in this session, if any.
    pub fn room_of(&self, user_id: &str) -> Option<&SessionRoom> {
        self.rooms.iter().find(|room| room.contains(user_id))
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.room_of(user_id).is_some()
    }

    /// All users present in any room, sorted.
    pub fn user_ids(&self) -> BTreeSet<String> {
        self.rooms
            .iter()
            .flat_map(|room| room.members.iter().map(|m| m.user_id.clone()))
            .collect()
    }
}

/// Time shared with one companion (ms).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionTime {
    pub user_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub shared_time: i64,
}

/// Totals for one period; all durations in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    pub time_spent: i64,
    pub time_spent_alone: i64,
    /// Time in the excluded room; not part of any other total.
    pub time_away: i64,
    pub average_session_time: i64,
    pub top_companions: Vec<CompanionTime>,
}

/// The four period buckets of a stats document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodBuckets {
    #[serde(rename = "last24h")]
    pub last_24h: PeriodStats,
    #[serde(rename = "last7d")]
    pub last_7d: PeriodStats,
    #[serde(rename = "last30d")]
    pub last_30d: PeriodStats,
    #[serde(rename = "allTime")]
    pub all_time: PeriodStats,
}

impl PeriodBuckets {
    pub fn get(&self, window: TimeWindow) -> &PeriodStats {
        match window {
            TimeWindow::Last24h => &self.last_24h,
            TimeWindow::Last7d => &self.last_7d,
            TimeWindow::Last30d => &self.last_30d,
            TimeWindow::AllTime => &self.all_time,
        }
    }

    pub fn get_mut(&mut self, window: TimeWindow) -> &mut PeriodStats {
        match window {
            TimeWindow::Last24h => &mut self.last_24h,
            TimeWindow::Last7d => &mut self.last_7d,
            TimeWindow::Last30d => &mut self.last_30d,
            TimeWindow::AllTime => &mut self.all_time,
        }
    }
}

/// Per (group, user) stats document. Always rewritten as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub group_id: String,
    pub user_id: String,
    pub username: String,
    /// False when the name is a placeholder because the identity resolver could not answer.
    pub identity_resolved: bool,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub stats: PeriodBuckets,
    pub last_updated_at: DateTime<Utc>,
}

/// A room seen at least once for a group, with its latest name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: String,
    pub room_name: String,
}
