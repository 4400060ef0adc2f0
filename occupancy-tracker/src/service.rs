//! [`OccupancyTracker`]: wires the detector, sweeper, stats engine and recompute worker together
//! and exposes the ingest, query and trigger operations.

use crate::detector::{ChangeDetector, IngestReport};
use crate::dispatcher::{RecomputeDispatcher, RecomputeJob, RecomputeScheduler};
use crate::identity::IdentityResolver;
use crate::locks::{GroupLocks, HeartbeatRegistry};
use crate::membership::MembershipAuthority;
use crate::stats::{RecomputeReport, StatsEngine};
use crate::sweeper::{CleanupSweeper, SweepReport, SweeperHandle};
use chrono::{DateTime, Utc};
use occupancy_core::{
    OccupancyError, Result, RoomInfo, Session, Snapshot, TrackerConfig, UserStats, ValidationError,
};
use std::sync::Arc;
use storage::{
    SessionQuery, SessionRepository, SessionStore, SqlitePoolManager, StatsRepository,
    UserStatsStore,
};
use tracing::{info, instrument};

/// Collects the tracker's collaborators. Stores are required; resolver and authority are optional.
pub struct TrackerBuilder {
    config: TrackerConfig,
    sessions: Option<Arc<dyn SessionStore>>,
    stats: Option<Arc<dyn UserStatsStore>>,
    resolver: Option<Arc<dyn IdentityResolver>>,
    authority: Option<Arc<dyn MembershipAuthority>>,
}

impl TrackerBuilder {
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn stats_store(mut self, store: Arc<dyn UserStatsStore>) -> Self {
        self.stats = Some(store);
        self
    }

    pub fn identity_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn membership_authority(mut self, authority: Arc<dyn MembershipAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Validates the config and spawns the recompute worker; must run inside a tokio runtime.
    pub fn build(self) -> Result<OccupancyTracker> {
        self.config.validate()?;
        let sessions = self
            .sessions
            .ok_or_else(|| OccupancyError::Config("session store is required".to_string()))?;
        let stats = self
            .stats
            .ok_or_else(|| OccupancyError::Config("stats store is required".to_string()))?;

        let engine = Arc::new(StatsEngine::new(
            sessions.clone(),
            stats.clone(),
            self.resolver,
            self.config.excluded_room_id.clone(),
        ));
        let dispatcher = RecomputeDispatcher::start(engine.clone());
        let scheduler: Arc<dyn RecomputeScheduler> = Arc::new(dispatcher.clone());
        let locks = GroupLocks::new();
        let heartbeats = HeartbeatRegistry::new();

        let detector = ChangeDetector::new(
            sessions.clone(),
            locks.clone(),
            heartbeats.clone(),
            scheduler.clone(),
            self.config.round_to_minute,
        );
        let sweeper = Arc::new(CleanupSweeper::new(
            sessions.clone(),
            self.authority,
            locks,
            heartbeats,
            scheduler,
            self.config.cleanup_interval(),
            self.config.min_session_age(),
            self.config.stale_timeout(),
        ));

        Ok(OccupancyTracker {
            config: self.config,
            sessions,
            stats,
            engine,
            dispatcher,
            detector,
            sweeper,
        })
    }
}

pub struct OccupancyTracker {
    config: TrackerConfig,
    sessions: Arc<dyn SessionStore>,
    stats: Arc<dyn UserStatsStore>,
    engine: Arc<StatsEngine>,
    dispatcher: RecomputeDispatcher,
    detector: ChangeDetector,
    sweeper: Arc<CleanupSweeper>,
}

impl OccupancyTracker {
    pub fn builder(config: TrackerConfig) -> TrackerBuilder {
        TrackerBuilder {
            config,
            sessions: None,
            stats: None,
            resolver: None,
            authority: None,
        }
    }

    /// Builds a tracker on the SQLite database named by `config.database_url`.
    pub async fn open(config: TrackerConfig) -> Result<Self> {
        info!(database_url = %config.database_url, "Opening occupancy stores");
        let pool = SqlitePoolManager::new(&config.database_url)
            .await
            .map_err(|e| OccupancyError::Storage(e.to_string()))?;
        let sessions = SessionRepository::with_pool(pool.clone()).await?;
        let stats = StatsRepository::with_pool(pool).await?;

        Self::builder(config)
            .session_store(Arc::new(sessions))
            .stats_store(Arc::new(stats))
            .build()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub async fn ingest(&self, group_id: &str, snapshot: Snapshot) -> Result<IngestReport> {
        self.detector.ingest(group_id, snapshot).await
    }

    /// Parses a raw `{"rooms": [...]}` body and ingests it.
    pub async fn ingest_json(
        &self,
        group_id: &str,
        payload: &str,
        taken_at: DateTime<Utc>,
    ) -> Result<IngestReport> {
        let snapshot = Snapshot::from_json(payload, taken_at)?;
        self.ingest(group_id, snapshot).await
    }

    /// Sessions of the group whose start lies in `[from, to]`, ascending.
    pub async fn list_sessions(
        &self,
        group_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Session>> {
        let query = SessionQuery {
            group_id: group_id.to_string(),
            from,
            to,
            limit: None,
        };
        Ok(self.sessions.sessions(&query).await?)
    }

    /// Returns the stored document. When it is missing but the user has history, queues a
    /// recompute and polls a bounded number of times before answering `StillComputing`.
    #[instrument(skip(self))]
    pub async fn get_user_stats(&self, group_id: &str, user_id: &str) -> Result<UserStats> {
        if let Some(stats) = self.stats.get(group_id, user_id).await? {
            return Ok(stats);
        }
        if !self.sessions.has_user_sessions(group_id, user_id).await? {
            return Err(OccupancyError::NotFound(format!(
                "no sessions for user {} in group {}",
                user_id, group_id
            )));
        }

        info!(group_id = %group_id, user_id = %user_id, "step: stats missing, scheduling recompute");
        self.dispatcher
            .schedule(RecomputeJob::users(group_id, vec![user_id.to_string()]));

        for _ in 0..self.config.stats_poll_attempts {
            tokio::time::sleep(self.config.stats_poll_interval()).await;
            if let Some(stats) = self.stats.get(group_id, user_id).await? {
                return Ok(stats);
            }
        }

        Err(OccupancyError::StillComputing {
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
        })
    }

    pub fn recompute_group(&self, group_id: &str) {
        self.dispatcher.schedule(RecomputeJob::group(group_id));
    }

    pub fn recompute_user(&self, group_id: &str, user_id: &str) {
        self.dispatcher
            .schedule(RecomputeJob::users(group_id, vec![user_id.to_string()]));
    }

    /// Deletes the group's stats and recomputes every user in the background.
    pub fn force_recalculate_group(&self, group_id: &str) {
        self.dispatcher.schedule(RecomputeJob::reset(group_id));
    }

    /// Runs a recompute inline and returns its report.
    pub async fn recompute_now(&self, job: &RecomputeJob) -> Result<RecomputeReport> {
        self.engine.run_job(job, Utc::now()).await
    }

    /// Waits until every recompute queued so far has finished.
    pub async fn flush_recomputes(&self) {
        self.dispatcher.flush().await;
    }

    pub async fn list_rooms(&self, group_id: &str) -> Result<Vec<RoomInfo>> {
        Ok(self.sessions.rooms(group_id).await?)
    }

    pub async fn sweep_now(&self) -> Result<SweepReport> {
        self.sweeper.run_pass(Utc::now()).await
    }

    pub fn start_sweeper(&self) -> SweeperHandle {
        self.sweeper.start()
    }

    /// Stores a complete session record as-is (backfills); bypasses change detection.
    pub async fn import_session(&self, session: &Session) -> Result<()> {
        if session.group_id.trim().is_empty() {
            return Err(ValidationError::EmptyGroupId.into());
        }
        if let Some(end) = session.end {
            if end < session.start {
                return Err(ValidationError::Malformed(format!(
                    "session {} ends before it starts",
                    session.id
                ))
                .into());
            }
        }
        self.sessions.insert_session(session).await?;
        self.dispatcher.schedule(RecomputeJob::users(
            &session.group_id,
            session.user_ids().into_iter().collect(),
        ));
        Ok(())
    }
}
