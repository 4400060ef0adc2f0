//! # occupancy-core
//!
//! Core types and utilities for the room occupancy tracker: snapshots, sessions and stats documents,
//! state signatures, window arithmetic, errors, configuration and tracing initialization.
//! Storage-agnostic; used by the storage crate, the tracker and the CLI.

pub mod config;
pub mod error;
pub mod logger;
pub mod signature;
pub mod time;
pub mod types;

pub use config::TrackerConfig;
pub use error::{OccupancyError, Result, ValidationError};
pub use logger::init_tracing;
pub use signature::{NormalizedState, StateSignature};
pub use time::{overlap_ms, round_to_minute, TimeWindow};
pub use types::{
    default_username, CompanionTime, IngestPayload, MemberSnapshot, PeriodBuckets, PeriodStats,
    RoomInfo, RoomSnapshot, Session, SessionMember, SessionRoom, Snapshot, UserStats,
};
