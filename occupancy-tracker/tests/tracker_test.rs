//! Integration tests for the [`occupancy_tracker::OccupancyTracker`] facade: ingest through stats
//! queries with the real recompute worker.

mod common;

use common::{minutes, snapshot, stores, test_config, FakeAuthority, FlakyStatsStore};
use occupancy_core::{OccupancyError, Session, SessionMember, SessionRoom, TrackerConfig, ValidationError};
use occupancy_tracker::{IngestOutcome, LiveMembership, OccupancyTracker, RecomputeJob};
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{SessionStore, StatsRepository, UserStatsStore};

const MIN: i64 = 60_000;

async fn tracker(config: TrackerConfig) -> (OccupancyTracker, Arc<StatsRepository>) {
    let (sessions, stats) = stores().await;
    let tracker = OccupancyTracker::builder(config)
        .session_store(sessions)
        .stats_store(stats.clone())
        .build()
        .expect("Failed to build tracker");
    (tracker, stats)
}

/// **Test: Stats become available after ingest without an explicit trigger.**
///
/// **Setup:** Tracker with the background worker.
/// **Action:** Ingest the alice/bob walk-through, flush the worker, read alice's stats.
/// **Expected:** Document present with 2m alone and bob as companion for 3m.
#[tokio::test]
async fn test_ingest_schedules_recompute() {
    let (tracker, _) = tracker(test_config()).await;

    tracker.ingest("g1", snapshot(minutes(0), &[("room1", &["alice"])])).await.unwrap();
    tracker.ingest("g1", snapshot(minutes(1), &[("room1", &["alice"])])).await.unwrap();
    tracker
        .ingest("g1", snapshot(minutes(2), &[("room1", &["alice", "bob"])]))
        .await
        .unwrap();
    tracker.ingest("g1", snapshot(minutes(5), &[])).await.unwrap();
    tracker.flush_recomputes().await;

    let alice = tracker.get_user_stats("g1", "alice").await.unwrap();
    assert_eq!(alice.stats.all_time.time_spent_alone, 2 * MIN);
    assert_eq!(alice.stats.all_time.top_companions[0].user_id, "bob");
    assert_eq!(alice.stats.all_time.top_companions[0].shared_time, 3 * MIN);
}

/// **Test: Missing stats for a user with history are computed within the polling budget.**
///
/// **Setup:** Session imported for user a, then its scheduled document deleted.
/// **Action:** `get_user_stats("g1", "a")`.
/// **Expected:** A freshly computed document is returned.
#[tokio::test]
async fn test_get_user_stats_computes_on_demand() {
    let (tracker, stats) = tracker(test_config()).await;
    let mut session = Session::open(
        "g1",
        minutes(0),
        vec![SessionRoom {
            room_id: "r1".into(),
            room_name: "Lobby".into(),
            members: vec![SessionMember {
                user_id: "a".into(),
                username: "Ann".into(),
            }],
        }],
    );
    session.end = Some(minutes(4));
    tracker.import_session(&session).await.unwrap();
    tracker.flush_recomputes().await;
    stats.delete_for_group("g1").await.unwrap();

    let doc = tracker.get_user_stats("g1", "a").await.unwrap();
    assert_eq!(doc.username, "Ann");
    assert_eq!(doc.stats.all_time.time_spent, 4 * MIN);
}

/// **Test: Stats that never land end the wait with StillComputing.**
///
/// **Setup:** Stats store that refuses every write for user a; 2 poll attempts of 10ms.
/// **Action:** Import a session for a, then `get_user_stats("g1", "a")`.
/// **Expected:** `OccupancyError::StillComputing` for (g1, a), returned well within a second.
#[tokio::test]
async fn test_get_user_stats_gives_up_after_polling() {
    let (sessions, stats) = stores().await;
    let config = TrackerConfig {
        stats_poll_attempts: 2,
        ..test_config()
    };
    let tracker = OccupancyTracker::builder(config)
        .session_store(sessions)
        .stats_store(Arc::new(FlakyStatsStore::new(stats.clone(), &["a"])))
        .build()
        .expect("Failed to build tracker");
    let mut session = Session::open(
        "g1",
        minutes(0),
        vec![SessionRoom {
            room_id: "r1".into(),
            room_name: "Lobby".into(),
            members: vec![SessionMember {
                user_id: "a".into(),
                username: "Ann".into(),
            }],
        }],
    );
    session.end = Some(minutes(4));
    tracker.import_session(&session).await.unwrap();
    tracker.flush_recomputes().await;
    stats.delete_for_group("g1").await.unwrap();

    let started = Instant::now();
    let err = tracker.get_user_stats("g1", "a").await.unwrap_err();

    match err {
        OccupancyError::StillComputing { group_id, user_id } => {
            assert_eq!(group_id, "g1");
            assert_eq!(user_id, "a");
        }
        other => panic!("expected StillComputing, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// **Test: A user without history is NotFound, not StillComputing.**
///
/// **Setup:** Empty tracker.
/// **Action:** `get_user_stats("g1", "nobody")`.
/// **Expected:** `OccupancyError::NotFound`.
#[tokio::test]
async fn test_get_user_stats_not_found() {
    let (tracker, _) = tracker(test_config()).await;

    let err = tracker.get_user_stats("g1", "nobody").await.unwrap_err();
    assert!(matches!(err, OccupancyError::NotFound(_)));
}

/// **Test: Raw JSON payloads are parsed and validated.**
///
/// **Setup:** Empty tracker.
/// **Action:** Ingest a valid `memberId` payload, then a payload whose rooms are not a list.
/// **Expected:** First creates a session; second is a Malformed validation error.
#[tokio::test]
async fn test_ingest_json() {
    let (tracker, _) = tracker(test_config()).await;

    let report = tracker
        .ingest_json(
            "g1",
            r#"{"rooms":[{"roomId":"r1","roomName":"Lobby","members":[{"memberId":"a","username":"Ann"}]}]}"#,
            minutes(0),
        )
        .await
        .unwrap();
    assert_eq!(report.outcome, IngestOutcome::Created);

    let err = tracker
        .ingest_json("g1", r#"{"rooms": {"r1": []}}"#, minutes(1))
        .await
        .unwrap_err();
    assert!(matches!(err, OccupancyError::Validation(ValidationError::Malformed(_))));
}

/// **Test: Timestamps are truncated to the minute when rounding is on.**
///
/// **Setup:** Default rounding enabled.
/// **Action:** Ingest at t0+30s.
/// **Expected:** Session starts at t0.
#[tokio::test]
async fn test_round_to_minute() {
    let config = TrackerConfig {
        round_to_minute: true,
        ..test_config()
    };
    let (tracker, _) = tracker(config).await;

    let at = minutes(0) + chrono::Duration::seconds(30);
    let report = tracker.ingest("g1", snapshot(at, &[("r1", &["a"])])).await.unwrap();

    assert_eq!(report.session.unwrap().start, minutes(0));
}

/// **Test: Session listing, room directory and force recalculation.**
///
/// **Setup:** Three transitions across two rooms.
/// **Action:** List sessions in a range, list rooms, force recalculation.
/// **Expected:** Range applies to start times; both rooms listed; stats exist after flush.
#[tokio::test]
async fn test_queries_and_triggers() {
    let (tracker, stats) = tracker(test_config()).await;
    tracker.ingest("g1", snapshot(minutes(0), &[("r1", &["a"])])).await.unwrap();
    tracker.ingest("g1", snapshot(minutes(5), &[("r2", &["a"])])).await.unwrap();
    tracker.ingest("g1", snapshot(minutes(9), &[])).await.unwrap();

    let all = tracker.list_sessions("g1", None, None).await.unwrap();
    assert_eq!(all.len(), 2);
    let later = tracker.list_sessions("g1", Some(minutes(1)), None).await.unwrap();
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].start, minutes(5));

    let rooms: Vec<String> = tracker
        .list_rooms("g1")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.room_name)
        .collect();
    assert_eq!(rooms, vec!["Room r1", "Room r2"]);

    tracker.flush_recomputes().await;
    stats.delete_for_group("g1").await.unwrap();
    tracker.force_recalculate_group("g1");
    tracker.flush_recomputes().await;
    assert!(stats.get("g1", "a").await.unwrap().is_some());

    let report = tracker.recompute_now(&RecomputeJob::group("g1")).await.unwrap();
    assert_eq!(report.updated, vec!["a"]);
}

/// **Test: One-shot sweep closes a stale session confirmed empty.**
///
/// **Setup:** Tracker with an authority answering Empty; session imported long before now.
/// **Action:** `sweep_now()`.
/// **Expected:** One session expired; none left open.
#[tokio::test]
async fn test_sweep_now() {
    let (sessions, stats) = stores().await;
    let tracker = OccupancyTracker::builder(test_config())
        .session_store(sessions.clone())
        .stats_store(stats)
        .membership_authority(Arc::new(FakeAuthority::answering(Some(LiveMembership::Empty))))
        .build()
        .unwrap();
    tracker.ingest("g1", snapshot(minutes(0), &[("r1", &["a"])])).await.unwrap();

    let report = tracker.sweep_now().await.unwrap();

    assert_eq!(report.expired, 1);
    assert!(sessions.open_sessions().await.unwrap().is_empty());
}

/// **Test: Builder rejects an invalid configuration and missing stores.**
///
/// **Setup:** Config with a zero cleanup interval; builder without stores.
/// **Action:** `build()`.
/// **Expected:** Config errors.
#[tokio::test]
async fn test_builder_validation() {
    let config = TrackerConfig {
        cleanup_interval_ms: 0,
        ..test_config()
    };
    assert!(matches!(
        OccupancyTracker::builder(config).build(),
        Err(OccupancyError::Config(_))
    ));
    assert!(matches!(
        OccupancyTracker::builder(test_config()).build(),
        Err(OccupancyError::Config(_))
    ));
}

/// **Test: Importing a session that ends before it starts is rejected.**
///
/// **Setup:** Session with end < start.
/// **Action:** `import_session`.
/// **Expected:** Malformed validation error; nothing stored.
#[tokio::test]
async fn test_import_rejects_inverted_session() {
    let (sessions, stats) = stores().await;
    let tracker = OccupancyTracker::builder(test_config())
        .session_store(sessions.clone())
        .stats_store(stats)
        .build()
        .unwrap();
    let mut session = Session::open("g1", minutes(5), vec![]);
    session.end = Some(minutes(1));

    let err = tracker.import_session(&session).await.unwrap_err();
    assert!(matches!(err, OccupancyError::Validation(ValidationError::Malformed(_))));
    assert!(sessions.latest_session("g1").await.unwrap().is_none());
}

/// **Test: `open` builds a tracker on a file database.**
///
/// **Setup:** Temp directory config.
/// **Action:** `OccupancyTracker::open`, ingest, reopen, list sessions.
/// **Expected:** The session persists across instances.
#[tokio::test]
async fn test_open_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackerConfig {
        database_url: dir.path().join("occupancy.db").to_string_lossy().into_owned(),
        ..test_config()
    };

    {
        let tracker = OccupancyTracker::open(config.clone()).await.unwrap();
        tracker.ingest("g1", snapshot(minutes(0), &[("r1", &["a"])])).await.unwrap();
        tracker.flush_recomputes().await;
    }

    let tracker = OccupancyTracker::open(config).await.unwrap();
    assert_eq!(tracker.list_sessions("g1", None, None).await.unwrap().len(), 1);
}
