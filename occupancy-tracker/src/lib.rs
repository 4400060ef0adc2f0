//! # occupancy-tracker
//!
//! Reconstructs room-occupancy sessions from periodic snapshots and derives per-user stats.
//!
//! ## Modules
//!
//! - [`detector`] – ChangeDetector: snapshot → session transitions
//! - [`sweeper`] – CleanupSweeper: closes sessions orphaned by a stopped snapshot stream
//! - [`stats`] – StatsEngine and the pure aggregation over rolling windows
//! - [`dispatcher`] – background recompute worker
//! - [`identity`] / [`membership`] – seams for identity and live-membership sources
//! - [`locks`] – per-group locks and heartbeat registry
//! - [`service`] – OccupancyTracker facade

pub mod detector;
pub mod dispatcher;
pub mod identity;
pub mod locks;
pub mod membership;
pub mod service;
pub mod stats;
pub mod sweeper;

pub use detector::{ChangeDetector, IngestOutcome, IngestReport};
pub use dispatcher::{RecomputeDispatcher, RecomputeJob, RecomputeScheduler};
pub use identity::{Identity, IdentityCache, IdentityResolver, Resolution};
pub use locks::{GroupLocks, HeartbeatRegistry};
pub use membership::{LiveMembership, MembershipAuthority};
pub use service::{OccupancyTracker, TrackerBuilder};
pub use stats::{aggregate_user, RecomputeReport, StatsEngine, UserAggregate, WindowTotals};
pub use sweeper::{CleanupSweeper, SessionAge, SweepReport, SweeperHandle};
