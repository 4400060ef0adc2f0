//! Change detector: turns snapshots into session transitions.
//!
//! A snapshot is normalized and its signature compared with the latest session of the group.
//! Equal signatures are heartbeats and write nothing. A different signature closes the open session
//! (if any) and, when anyone is present, opens its successor starting at the same instant. Older
//! sessions still open next to the current one are closed in the same transaction.

use crate::dispatcher::{RecomputeJob, RecomputeScheduler};
use crate::locks::{GroupLocks, HeartbeatRegistry};
use chrono::{DateTime, Utc};
use occupancy_core::{
    round_to_minute, NormalizedState, Result, Session, SessionRoom, Snapshot, StateSignature,
    ValidationError,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use storage::{CloseSession, SessionStore, SessionTransition};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IngestOutcome {
    /// A new open session was recorded (the previous one, if open, was closed).
    Created,
    /// Same state as the current session; nothing written.
    Unchanged,
    /// The open session was closed and nobody is present any more.
    ClosedOnly,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub outcome: IngestOutcome,
    /// The group's open session after the ingest, if any.
    pub session: Option<Session>,
    /// The session closed by this ingest, with its end set.
    pub closed: Option<Session>,
    /// Older sessions found open next to the current one, closed at their successor's start.
    pub repaired: Vec<Session>,
    /// Users of the closed and opened sessions; their stats are queued for recomputation.
    pub affected_users: Vec<String>,
}

pub struct ChangeDetector {
    sessions: Arc<dyn SessionStore>,
    locks: GroupLocks,
    heartbeats: HeartbeatRegistry,
    scheduler: Arc<dyn RecomputeScheduler>,
    round_to_minute: bool,
}

impl ChangeDetector {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        locks: GroupLocks,
        heartbeats: HeartbeatRegistry,
        scheduler: Arc<dyn RecomputeScheduler>,
        round_to_minute: bool,
    ) -> Self {
        Self {
            sessions,
            locks,
            heartbeats,
            scheduler,
            round_to_minute,
        }
    }

    /// Applies one snapshot. Invalid snapshots are rejected before any state is read or written.
    #[instrument(skip(self, snapshot), fields(taken_at = %snapshot.taken_at))]
    pub async fn ingest(&self, group_id: &str, snapshot: Snapshot) -> Result<IngestReport> {
        if group_id.trim().is_empty() {
            return Err(ValidationError::EmptyGroupId.into());
        }
        snapshot.validate()?;

        let taken_at = if self.round_to_minute {
            round_to_minute(snapshot.taken_at)
        } else {
            snapshot.taken_at
        };
        let state = NormalizedState::from_snapshot_rooms(&snapshot.rooms);
        let signature = state.signature();

        let _guard = self.locks.lock(group_id).await;
        self.heartbeats.record(group_id, taken_at);

        let latest = self.sessions.latest_session(group_id).await?;
        let current = latest.as_ref().filter(|s| s.is_open());
        let current_signature = current
            .map(|s| NormalizedState::from_session_rooms(&s.rooms).signature())
            .unwrap_or_else(StateSignature::empty);

        if signature == current_signature {
            debug!(group_id = %group_id, "step: snapshot unchanged");
            return Ok(IngestReport {
                outcome: IngestOutcome::Unchanged,
                session: current.cloned(),
                closed: None,
                repaired: Vec::new(),
                affected_users: Vec::new(),
            });
        }

        let at = Self::clamp_to_history(group_id, taken_at, latest.as_ref());
        let repaired = self.superseded_open_sessions(group_id, current, at).await?;

        let closed = current.cloned().map(|mut s| {
            s.end = Some(at);
            s
        });
        let opened = (!state.is_empty()).then(|| {
            let rooms = snapshot.rooms.iter().map(SessionRoom::from_snapshot).collect();
            Session::open(group_id, at, rooms)
        });

        let transition = SessionTransition {
            group_id: group_id.to_string(),
            repairs: repaired
                .iter()
                .filter_map(|s| {
                    s.end.map(|end| CloseSession {
                        session_id: s.id.clone(),
                        end,
                    })
                })
                .collect(),
            close: closed.as_ref().map(|s| CloseSession {
                session_id: s.id.clone(),
                end: at,
            }),
            open: opened.clone(),
        };
        self.sessions.record_transition(&transition).await?;

        let affected: BTreeSet<String> = repaired
            .iter()
            .chain(closed.iter())
            .chain(opened.iter())
            .flat_map(|s| s.user_ids())
            .collect();
        let affected_users: Vec<String> = affected.into_iter().collect();
        self.scheduler
            .schedule(RecomputeJob::users(group_id, affected_users.clone()));

        let outcome = if opened.is_some() {
            IngestOutcome::Created
        } else {
            IngestOutcome::ClosedOnly
        };
        info!(
            group_id = %group_id,
            outcome = ?outcome,
            closed = ?closed.as_ref().map(|s| s.id.as_str()),
            opened = ?opened.as_ref().map(|s| s.id.as_str()),
            repaired = repaired.len(),
            signature = %signature,
            "step: session transition recorded"
        );

        Ok(IngestReport {
            outcome,
            session: opened,
            closed,
            repaired,
            affected_users,
        })
    }

    /// Open sessions of the group other than `current`, each with its end set to the start of the
    /// session that follows it.
    async fn superseded_open_sessions(
        &self,
        group_id: &str,
        current: Option<&Session>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        let mut superseded = Vec::new();
        for mut session in self.sessions.open_sessions_in_group(group_id).await? {
            if current.is_some_and(|c| c.id == session.id) {
                continue;
            }
            let end = match self.sessions.successor_of(&session).await? {
                Some(successor) => successor.start.max(session.start),
                None => at.max(session.start),
            };
            warn!(
                group_id = %group_id,
                session_id = %session.id,
                end = %end,
                "Open session has a newer successor; closing it with the transition"
            );
            session.end = Some(end);
            superseded.push(session);
        }
        Ok(superseded)
    }

    /// A snapshot older than the latest recorded boundary is moved up to it.
    fn clamp_to_history(
        group_id: &str,
        taken_at: DateTime<Utc>,
        latest: Option<&Session>,
    ) -> DateTime<Utc> {
        let Some(latest) = latest else {
            return taken_at;
        };
        let boundary = latest.end.unwrap_or(latest.start);
        if taken_at < boundary {
            warn!(
                group_id = %group_id,
                taken_at = %taken_at,
                boundary = %boundary,
                "Out-of-order snapshot; using the latest session boundary"
            );
            boundary
        } else {
            taken_at
        }
    }
}
