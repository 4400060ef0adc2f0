//! Authoritative live-membership source consulted by the sweeper before closing a stale session.

use async_trait::async_trait;
use occupancy_core::Result;

/// What the authority reports for a group right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveMembership {
    /// At least one room has members.
    Occupied { members: usize },
    /// Every room is empty.
    Empty,
    /// The group no longer exists at the authority.
    GroupGone,
}

impl LiveMembership {
    /// True when the authority confirms nobody is present.
    pub fn confirms_empty(self) -> bool {
        matches!(self, LiveMembership::Empty | LiveMembership::GroupGone)
    }
}

/// Live membership lookup (e.g. the chat platform's API). Errors mean "unavailable", never "empty".
#[async_trait]
pub trait MembershipAuthority: Send + Sync {
    async fn live_membership(&self, group_id: &str) -> Result<LiveMembership>;
}
