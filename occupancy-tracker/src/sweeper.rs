//! Cleanup sweeper: closes sessions left open when the snapshot stream stopped.
//!
//! Each open session is classified by age. Fresh sessions are never touched. Any session with a newer
//! successor is a consistency anomaly and is closed at the successor's start. A stale session is only
//! closed when the membership authority confirms the group is empty.

use crate::dispatcher::{RecomputeJob, RecomputeScheduler};
use crate::locks::{GroupLocks, HeartbeatRegistry};
use crate::membership::{LiveMembership, MembershipAuthority};
use chrono::{DateTime, Duration, Utc};
use occupancy_core::{Result, Session};
use serde::Serialize;
use std::sync::Arc;
use storage::SessionStore;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Age class of an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAge {
    /// Younger than the minimum age; left alone.
    Fresh,
    /// Not old enough to expire; only the successor repair applies.
    Active,
    /// Old enough to close, given confirmation.
    Stale,
}

impl SessionAge {
    pub fn classify(age: Duration, min_age: Duration, stale_timeout: Duration) -> Self {
        if age < min_age {
            SessionAge::Fresh
        } else if age < stale_timeout {
            SessionAge::Active
        } else {
            SessionAge::Stale
        }
    }
}

/// Counters of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// The pass did not run because another one was in progress.
    pub skipped: bool,
    pub examined: usize,
    pub skipped_fresh: usize,
    /// Closed because a newer session of the same group exists.
    pub repaired: usize,
    /// Closed because the authority confirmed the group is empty.
    pub expired: usize,
    pub kept: usize,
    /// Stale sessions the authority reports occupied, without a recent snapshot.
    pub snapshot_gaps: usize,
    pub errors: usize,
}

pub struct CleanupSweeper {
    sessions: Arc<dyn SessionStore>,
    authority: Option<Arc<dyn MembershipAuthority>>,
    locks: GroupLocks,
    heartbeats: HeartbeatRegistry,
    scheduler: Arc<dyn RecomputeScheduler>,
    interval: std::time::Duration,
    min_session_age: Duration,
    stale_timeout: Duration,
    pass_guard: Mutex<()>,
}

/// Running sweeper loop; dropping the handle leaves the loop running, [`SweeperHandle::stop`] ends it.
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl CleanupSweeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        authority: Option<Arc<dyn MembershipAuthority>>,
        locks: GroupLocks,
        heartbeats: HeartbeatRegistry,
        scheduler: Arc<dyn RecomputeScheduler>,
        interval: std::time::Duration,
        min_session_age: Duration,
        stale_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            authority,
            locks,
            heartbeats,
            scheduler,
            interval,
            min_session_age,
            stale_timeout,
            pass_guard: Mutex::new(()),
        }
    }

    /// Starts the periodic loop; the first pass runs immediately.
    pub fn start(self: &Arc<Self>) -> SweeperHandle {
        let sweeper = self.clone();
        info!(interval_ms = self.interval.as_millis() as u64, "Starting cleanup sweeper");

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweeper.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = sweeper.run_pass(Utc::now()).await {
                    error!(error = %e, "Cleanup pass failed");
                }
            }
        });

        SweeperHandle { task }
    }

    /// Runs one pass over all open sessions. Returns a skipped report if a pass is already running.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let Ok(_pass) = self.pass_guard.try_lock() else {
            debug!("Cleanup pass already running; skipping");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        };

        let open = self.sessions.open_sessions().await?;
        let mut report = SweepReport {
            examined: open.len(),
            ..SweepReport::default()
        };

        for session in &open {
            if let Err(e) = self.sweep_session(session, now, &mut report).await {
                report.errors += 1;
                error!(session_id = %session.id, group_id = %session.group_id, error = %e, "Failed to sweep session");
            }
        }

        if report.repaired + report.expired + report.errors > 0 {
            info!(report = ?report, "Cleanup pass done");
        } else {
            debug!(report = ?report, "Cleanup pass done");
        }
        Ok(report)
    }

    async fn sweep_session(
        &self,
        session: &Session,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        let age = SessionAge::classify(now - session.start, self.min_session_age, self.stale_timeout);
        if age == SessionAge::Fresh {
            report.skipped_fresh += 1;
            return Ok(());
        }

        if let Some(successor) = self.sessions.successor_of(session).await? {
            let end = successor.start.max(session.start);
            warn!(
                session_id = %session.id,
                successor_id = %successor.id,
                group_id = %session.group_id,
                "Open session has a newer successor; closing it"
            );
            if self.close(session, end).await? {
                report.repaired += 1;
            }
            return Ok(());
        }

        if age == SessionAge::Active {
            report.kept += 1;
            return Ok(());
        }

        let Some(authority) = &self.authority else {
            debug!(session_id = %session.id, "Stale session kept; no membership authority configured");
            report.kept += 1;
            return Ok(());
        };

        match authority.live_membership(&session.group_id).await {
            Ok(membership) if membership.confirms_empty() => {
                info!(
                    session_id = %session.id,
                    group_id = %session.group_id,
                    membership = ?membership,
                    "Closing stale session"
                );
                if self.close(session, now).await? {
                    report.expired += 1;
                } else {
                    report.kept += 1;
                }
            }
            Ok(LiveMembership::Occupied { members }) => {
                report.kept += 1;
                let recent = self
                    .heartbeats
                    .last_seen(&session.group_id)
                    .is_some_and(|seen| now - seen < self.stale_timeout);
                if recent {
                    debug!(session_id = %session.id, "Long-running session still reported by snapshots");
                } else {
                    report.snapshot_gaps += 1;
                    warn!(
                        session_id = %session.id,
                        group_id = %session.group_id,
                        members,
                        "Rooms are occupied but no recent snapshot arrived; keeping session open"
                    );
                }
            }
            Ok(_) => report.kept += 1,
            Err(e) => {
                report.kept += 1;
                warn!(
                    session_id = %session.id,
                    group_id = %session.group_id,
                    error = %e,
                    "Membership authority unavailable; keeping session open"
                );
            }
        }

        Ok(())
    }

    /// Closes under the group lock if still open, then queues recomputation for its users.
    async fn close(&self, session: &Session, end: DateTime<Utc>) -> Result<bool> {
        let _guard = self.locks.lock(&session.group_id).await;
        let closed = self.sessions.close_session(&session.id, end).await?;
        if closed {
            self.scheduler.schedule(RecomputeJob::users(
                &session.group_id,
                session.user_ids().into_iter().collect(),
            ));
        } else {
            debug!(session_id = %session.id, "Session was closed concurrently");
        }
        Ok(closed)
    }
}
