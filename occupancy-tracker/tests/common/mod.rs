//! Hand-written fakes and fixtures shared by the tracker integration tests.
//!
//! - `RecordingScheduler` records recompute jobs instead of running them.
//! - `FakeIdentityResolver` answers from a fixed table and counts calls.
//! - `FakeAuthority` returns a configurable membership answer; it can also block until released.
//! - `FlakyStatsStore` wraps a real stats store and fails writes for chosen users.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use occupancy_core::{
    MemberSnapshot, OccupancyError, Result, RoomSnapshot, Snapshot, TrackerConfig, UserStats,
};
use occupancy_tracker::{
    Identity, IdentityResolver, LiveMembership, MembershipAuthority, RecomputeJob,
    RecomputeScheduler,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use storage::{SessionRepository, SqlitePoolManager, StatsRepository, StorageError, UserStatsStore};
use tokio::sync::Notify;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

pub fn minutes(m: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(m)
}

/// Builds a snapshot from `(room_id, [member_id, ...])` pairs; usernames are capitalized ids.
pub fn snapshot(at: DateTime<Utc>, rooms: &[(&str, &[&str])]) -> Snapshot {
    Snapshot::new(
        at,
        rooms
            .iter()
            .map(|(room_id, members)| RoomSnapshot {
                room_id: room_id.to_string(),
                room_name: Some(format!("Room {}", room_id)),
                members: members
                    .iter()
                    .map(|m| MemberSnapshot {
                        member_id: m.to_string(),
                        username: Some(m.to_string()),
                    })
                    .collect(),
            })
            .collect(),
    )
}

pub async fn stores() -> (Arc<SessionRepository>, Arc<StatsRepository>) {
    let pool = SqlitePoolManager::new("sqlite::memory:")
        .await
        .expect("Failed to create pool");
    let sessions = SessionRepository::with_pool(pool.clone())
        .await
        .expect("Failed to create session repository");
    let stats = StatsRepository::with_pool(pool)
        .await
        .expect("Failed to create stats repository");
    (Arc::new(sessions), Arc::new(stats))
}

/// Config for tests: no minute rounding, short polling.
pub fn test_config() -> TrackerConfig {
    TrackerConfig {
        database_url: "sqlite::memory:".to_string(),
        round_to_minute: false,
        stats_poll_attempts: 20,
        stats_poll_interval_ms: 10,
        ..TrackerConfig::default()
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<RecomputeJob>>,
}

impl RecordingScheduler {
    pub fn jobs(&self) -> Vec<RecomputeJob> {
        self.jobs.lock().unwrap().clone()
    }

    /// Every user named by any recorded job.
    pub fn scheduled_users(&self) -> HashSet<String> {
        self.jobs()
            .into_iter()
            .flat_map(|job| job.user_ids.unwrap_or_default())
            .collect()
    }
}

impl RecomputeScheduler for RecordingScheduler {
    fn schedule(&self, job: RecomputeJob) {
        self.jobs.lock().unwrap().push(job);
    }
}

pub enum FakeAnswer {
    Human(&'static str),
    Bot(&'static str),
    Unknown,
    Down,
}

#[derive(Default)]
pub struct FakeIdentityResolver {
    answers: HashMap<String, FakeAnswer>,
    calls: AtomicUsize,
}

impl FakeIdentityResolver {
    pub fn with(mut self, user_id: &str, answer: FakeAnswer) -> Self {
        self.answers.insert(user_id.to_string(), answer);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityResolver for FakeIdentityResolver {
    async fn resolve(&self, _group_id: &str, user_id: &str) -> Result<Option<Identity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let identity = |name: &str, is_bot: bool| Identity {
            user_id: user_id.to_string(),
            display_name: name.to_string(),
            avatar_url: (!is_bot).then(|| format!("https://cdn.test/avatars/{}.png", user_id)),
            is_bot,
        };
        match self.answers.get(user_id) {
            Some(FakeAnswer::Human(name)) => Ok(Some(identity(name, false))),
            Some(FakeAnswer::Bot(name)) => Ok(Some(identity(name, true))),
            Some(FakeAnswer::Unknown) => Ok(None),
            Some(FakeAnswer::Down) | None => {
                Err(OccupancyError::Dependency("identity service unreachable".into()))
            }
        }
    }
}

pub struct FakeAuthority {
    answer: Mutex<Option<LiveMembership>>,
    calls: AtomicUsize,
    /// When set, each call signals `entered` and waits for `release`.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeAuthority {
    /// `None` makes every call fail.
    pub fn answering(answer: Option<LiveMembership>) -> Self {
        Self {
            answer: Mutex::new(answer),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn gated(answer: LiveMembership, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            answer: Mutex::new(Some(answer)),
            calls: AtomicUsize::new(0),
            gate: Some((entered, release)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipAuthority for FakeAuthority {
    async fn live_membership(&self, _group_id: &str) -> Result<LiveMembership> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        let answer = *self.answer.lock().unwrap();
        answer.ok_or_else(|| OccupancyError::Dependency("membership API unreachable".into()))
    }
}

/// Delegates to a real store but refuses to write documents for `failing_users`.
pub struct FlakyStatsStore {
    inner: Arc<StatsRepository>,
    failing_users: HashSet<String>,
}

impl FlakyStatsStore {
    pub fn new(inner: Arc<StatsRepository>, failing_users: &[&str]) -> Self {
        Self {
            inner,
            failing_users: failing_users.iter().map(|u| u.to_string()).collect(),
        }
    }
}

#[async_trait]
impl UserStatsStore for FlakyStatsStore {
    async fn upsert(&self, stats: &UserStats) -> std::result::Result<(), StorageError> {
        if self.failing_users.contains(&stats.user_id) {
            return Err(StorageError::Database("disk I/O error".into()));
        }
        self.inner.upsert(stats).await
    }

    async fn get(&self, group_id: &str, user_id: &str) -> std::result::Result<Option<UserStats>, StorageError> {
        self.inner.get(group_id, user_id).await
    }

    async fn delete_for_group(&self, group_id: &str) -> std::result::Result<u64, StorageError> {
        self.inner.delete_for_group(group_id).await
    }
}
