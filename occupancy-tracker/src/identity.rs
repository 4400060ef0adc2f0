//! Identity resolution for stats documents, with a cache that lives for one recompute call.

use async_trait::async_trait;
use occupancy_core::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Display information for a user as known to the identity source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_bot: bool,
}

/// Looks up users of a group. `Ok(None)` means the user is definitively unknown (e.g. left the group);
/// `Err` means the source is temporarily unavailable.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, group_id: &str, user_id: &str) -> Result<Option<Identity>>;
}

/// Outcome of one lookup as the stats engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Known(Identity),
    Unknown,
    Unavailable,
    /// No resolver is configured; names come from session history.
    NotConfigured,
}

/// Memoizes lookups for one group during one recompute; failures are cached too.
pub struct IdentityCache {
    resolver: Option<Arc<dyn IdentityResolver>>,
    group_id: String,
    entries: HashMap<String, Resolution>,
}

impl IdentityCache {
    pub fn new(resolver: Option<Arc<dyn IdentityResolver>>, group_id: &str) -> Self {
        Self {
            resolver,
            group_id: group_id.to_string(),
            entries: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, user_id: &str) -> Resolution {
        if let Some(hit) = self.entries.get(user_id) {
            return hit.clone();
        }

        let resolution = match &self.resolver {
            None => Resolution::NotConfigured,
            Some(resolver) => match resolver.resolve(&self.group_id, user_id).await {
                Ok(Some(identity)) => Resolution::Known(identity),
                Ok(None) => Resolution::Unknown,
                Err(e) => {
                    warn!(group_id = %self.group_id, user_id = %user_id, error = %e, "Identity lookup failed");
                    Resolution::Unavailable
                }
            },
        };

        self.entries.insert(user_id.to_string(), resolution.clone());
        resolution
    }
}
