//! Row and query types for the SQLite repositories.

mod session_query;
mod session_row;
mod stats_row;

pub use session_query::SessionQuery;
pub use session_row::SessionRow;
pub use stats_row::UserStatsRow;
