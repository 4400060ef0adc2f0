//! Query filter for listing sessions of a group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sessions of `group_id` whose start lies in `[from, to]` (either bound optional).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionQuery {
    pub group_id: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl SessionQuery {
    pub fn for_group(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Self::default()
        }
    }

    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}
