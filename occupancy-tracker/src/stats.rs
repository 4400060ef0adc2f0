//! Stats aggregation: per-user time totals and companion rankings over the four rolling windows.
//!
//! Documents are always recomputed from the full session history and written as a whole.
//! [`aggregate_user`] is the pure part; [`StatsEngine`] adds storage and identity resolution.

use crate::dispatcher::RecomputeJob;
use crate::identity::{IdentityCache, IdentityResolver, Resolution};
use chrono::{DateTime, Utc};
use occupancy_core::{
    default_username, overlap_ms, CompanionTime, PeriodBuckets, PeriodStats, Result, Session,
    TimeWindow, UserStats,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use storage::{SessionStore, UserStatsStore};
use tracing::{error, info, instrument};

/// Maximum number of companions kept per window.
pub const TOP_COMPANIONS: usize = 10;

/// Raw totals for one window, before names are attached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowTotals {
    pub time_spent: i64,
    pub time_spent_alone: i64,
    pub time_away: i64,
    /// Non-excluded sessions counted towards the average.
    pub session_count: i64,
    pub companions: HashMap<String, i64>,
}

impl WindowTotals {
    /// Mean counted time per session, rounded to the nearest millisecond.
    pub fn average_session_time(&self) -> i64 {
        if self.session_count == 0 {
            return 0;
        }
        (self.time_spent + self.session_count / 2) / self.session_count
    }

    /// Companions with shared time, longest first, ties by user id.
    pub fn ranked_companions(&self) -> Vec<(&str, i64)> {
        let mut ranked: Vec<(&str, i64)> = self
            .companions
            .iter()
            .filter(|(_, ms)| **ms > 0)
            .map(|(id, ms)| (id.as_str(), *ms))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

/// Everything derived from one user's session history.
#[derive(Debug, Clone)]
pub struct UserAggregate {
    pub user_id: String,
    pub sessions_seen: usize,
    windows: HashMap<TimeWindow, WindowTotals>,
    /// Most recent username seen per user id (the subject and their companions).
    names: HashMap<String, String>,
}

impl UserAggregate {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            sessions_seen: 0,
            windows: TimeWindow::ALL
                .iter()
                .map(|w| (*w, WindowTotals::default()))
                .collect(),
            names: HashMap::new(),
        }
    }

    pub fn window(&self, window: TimeWindow) -> &WindowTotals {
        &self.windows[&window]
    }

    /// Latest name from history, else `User <id>`.
    pub fn placeholder_name(&self, user_id: &str) -> String {
        self.names
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| default_username(user_id))
    }
}

/// Folds the sessions containing `user_id` into per-window totals.
///
/// Open sessions are counted up to `now`. Time in `excluded_room_id` only feeds `time_away`.
pub fn aggregate_user(
    user_id: &str,
    sessions: &[Session],
    now: DateTime<Utc>,
    excluded_room_id: Option<&str>,
) -> UserAggregate {
    let mut aggregate = UserAggregate::new(user_id);

    for session in sessions {
        let Some(room) = session.room_of(user_id) else {
            continue;
        };
        aggregate.sessions_seen += 1;

        // sessions arrive oldest first, so later names overwrite earlier ones
        for member in &room.members {
            aggregate
                .names
                .insert(member.user_id.clone(), member.username.clone());
        }

        let end = session.effective_end(now);
        let duration = session.duration_ms_at(now);
        let excluded = excluded_room_id == Some(room.room_id.as_str());
        let alone = room.member_count() == 1;

        for window in TimeWindow::ALL {
            let counted = match window.bounds(now) {
                None => duration,
                Some((window_start, window_end)) => {
                    let overlap = overlap_ms(session.start, end, window_start, window_end);
                    if overlap == 0 {
                        continue;
                    }
                    overlap
                }
            };

            let Some(totals) = aggregate.windows.get_mut(&window) else {
                continue;
            };
            if excluded {
                totals.time_away += counted;
                continue;
            }

            totals.time_spent += counted;
            totals.session_count += 1;
            if alone {
                totals.time_spent_alone += counted;
            }
            for other in room.members.iter().filter(|m| m.user_id != user_id) {
                *totals.companions.entry(other.user_id.clone()).or_insert(0) += counted;
            }
        }
    }

    aggregate
}

/// Result of one recompute call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeReport {
    pub group_id: String,
    pub updated: Vec<String>,
    /// Users whose previous document was left in place because recomputation failed.
    pub failed: Vec<String>,
    /// Documents deleted before recomputing (force recalculation).
    pub deleted: u64,
}

/// Recomputes and persists stats documents.
pub struct StatsEngine {
    sessions: Arc<dyn SessionStore>,
    stats: Arc<dyn UserStatsStore>,
    resolver: Option<Arc<dyn IdentityResolver>>,
    excluded_room_id: Option<String>,
}

impl StatsEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        stats: Arc<dyn UserStatsStore>,
        resolver: Option<Arc<dyn IdentityResolver>>,
        excluded_room_id: Option<String>,
    ) -> Self {
        Self {
            sessions,
            stats,
            resolver,
            excluded_room_id,
        }
    }

    pub async fn run_job(&self, job: &RecomputeJob, now: DateTime<Utc>) -> Result<RecomputeReport> {
        if job.reset {
            self.reset(&job.group_id, now).await
        } else {
            self.recompute(&job.group_id, job.user_ids.as_deref(), now).await
        }
    }

    /// Recomputes the given users, or every user with history when `user_ids` is `None`.
    /// A failure for one user is logged and does not stop the others.
    #[instrument(skip(self, user_ids))]
    pub async fn recompute(
        &self,
        group_id: &str,
        user_ids: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Result<RecomputeReport> {
        let users: Vec<String> = match user_ids {
            Some(ids) => ids
                .iter()
                .cloned()
                .collect::<BTreeSet<String>>()
                .into_iter()
                .collect(),
            None => self.sessions.user_ids(group_id).await?,
        };

        info!(group_id = %group_id, users = users.len(), "step: recomputing stats");

        let mut cache = IdentityCache::new(self.resolver.clone(), group_id);
        let mut report = RecomputeReport {
            group_id: group_id.to_string(),
            ..RecomputeReport::default()
        };

        for user_id in users {
            match self.compute_user(group_id, &user_id, now, &mut cache).await {
                Ok(Some(_)) => report.updated.push(user_id),
                Ok(None) => {}
                Err(e) => {
                    error!(group_id = %group_id, user_id = %user_id, error = %e, "Failed to recompute user stats");
                    report.failed.push(user_id);
                }
            }
        }

        Ok(report)
    }

    /// Deletes the group's stats, then recomputes everyone from scratch.
    #[instrument(skip(self))]
    pub async fn reset(&self, group_id: &str, now: DateTime<Utc>) -> Result<RecomputeReport> {
        let deleted = self.stats.delete_for_group(group_id).await?;
        let mut report = self.recompute(group_id, None, now).await?;
        report.deleted = deleted;
        Ok(report)
    }

    /// Builds and stores one user's document; `None` when the user has no sessions.
    async fn compute_user(
        &self,
        group_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
        cache: &mut IdentityCache,
    ) -> Result<Option<UserStats>> {
        let sessions = self.sessions.sessions_for_user(group_id, user_id).await?;
        let aggregate = aggregate_user(user_id, &sessions, now, self.excluded_room_id.as_deref());
        if aggregate.sessions_seen == 0 {
            return Ok(None);
        }

        let (username, avatar_url, identity_resolved) = match cache.resolve(user_id).await {
            Resolution::Known(identity) => (identity.display_name, identity.avatar_url, true),
            Resolution::Unavailable => (aggregate.placeholder_name(user_id), None, false),
            Resolution::Unknown | Resolution::NotConfigured => {
                (aggregate.placeholder_name(user_id), None, true)
            }
        };

        let mut buckets = PeriodBuckets::default();
        for window in TimeWindow::ALL {
            let totals = aggregate.window(window);
            *buckets.get_mut(window) = PeriodStats {
                time_spent: totals.time_spent,
                time_spent_alone: totals.time_spent_alone,
                time_away: totals.time_away,
                average_session_time: totals.average_session_time(),
                top_companions: Self::top_companions(&aggregate, totals, cache).await,
            };
        }

        let stats = UserStats {
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            username,
            identity_resolved,
            avatar_url,
            stats: buckets,
            last_updated_at: now,
        };
        self.stats.upsert(&stats).await?;

        Ok(Some(stats))
    }

    /// Bots and users the resolver no longer knows are left out; unreachable lookups keep a placeholder.
    async fn top_companions(
        aggregate: &UserAggregate,
        totals: &WindowTotals,
        cache: &mut IdentityCache,
    ) -> Vec<CompanionTime> {
        let mut top = Vec::with_capacity(TOP_COMPANIONS);

        for (companion_id, shared_time) in totals.ranked_companions() {
            if top.len() == TOP_COMPANIONS {
                break;
            }
            let (username, avatar_url) = match cache.resolve(companion_id).await {
                Resolution::Known(identity) if identity.is_bot => continue,
                Resolution::Known(identity) => (identity.display_name, identity.avatar_url),
                Resolution::Unknown => continue,
                Resolution::Unavailable | Resolution::NotConfigured => {
                    (aggregate.placeholder_name(companion_id), None)
                }
            };
            top.push(CompanionTime {
                user_id: companion_id.to_string(),
                username,
                avatar_url,
                shared_time,
            });
        }

        top
    }
}
