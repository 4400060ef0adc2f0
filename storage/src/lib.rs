//! Storage crate: session history and stats persistence.
//!
//! ## Modules
//!
//! - [`error`] – Storage error types
//! - [`models`] – SessionRow, SessionQuery, UserStatsRow
//! - [`repository`] – SessionStore / UserStatsStore traits
//! - [`session_repo`] – SessionRepository (SQLite)
//! - [`stats_repo`] – StatsRepository (SQLite)
//! - [`sqlite_pool`] – SqlitePoolManager

mod error;
mod models;
mod repository;
mod session_repo;
mod sqlite_pool;
mod stats_repo;


pub use error::StorageError;
pub use models::{SessionQuery, SessionRow, UserStatsRow};
pub use repository::{CloseSession, SessionStore, SessionTransition, UserStatsStore};
pub use session_repo::SessionRepository;
pub use sqlite_pool::SqlitePoolManager;
pub use stats_repo::StatsRepository;
