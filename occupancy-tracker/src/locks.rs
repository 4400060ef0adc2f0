//! Per-group async locks and the in-memory heartbeat registry, shared by the detector and the sweeper.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per group; open/close decisions for a group run under it.
/// Entries are never evicted, which assumes a bounded set of groups per process.
#[derive(Clone, Default)]
pub struct GroupLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the group's lock. The map entry is released before awaiting.
    pub async fn lock(&self, group_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .inner
            .entry(group_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

/// Last snapshot time seen per group, including heartbeats that wrote nothing.
#[derive(Clone, Default)]
pub struct HeartbeatRegistry {
    inner: Arc<DashMap<String, DateTime<Utc>>>,
}

impl HeartbeatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a snapshot time; older times never replace newer ones.
    pub fn record(&self, group_id: &str, at: DateTime<Utc>) {
        self.inner
            .entry(group_id.to_string())
            .and_modify(|seen| {
                if at > *seen {
                    *seen = at;
                }
            })
            .or_insert(at);
    }

    pub fn last_seen(&self, group_id: &str) -> Option<DateTime<Utc>> {
        self.inner.get(group_id).map(|seen| *seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_group_is_serialized() {
        let locks = GroupLocks::new();
        let guard = locks.lock("g1").await;

        let contender = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = contender.lock("g1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_other_groups_do_not_wait() {
        let locks = GroupLocks::new();
        let _g1 = locks.lock("g1").await;
        let _g2 = tokio::time::timeout(Duration::from_millis(100), locks.lock("g2"))
            .await
            .expect("lock for another group should not block");
    }

    #[test]
    fn test_heartbeat_keeps_latest() {
        let registry = HeartbeatRegistry::new();
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap();

        registry.record("g1", late);
        registry.record("g1", early);

        assert_eq!(registry.last_seen("g1"), Some(late));
        assert_eq!(registry.last_seen("g2"), None);
    }
}
