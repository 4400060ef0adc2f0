//! Time arithmetic shared by the detector, sweeper and stats engine.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// Rolling windows a stats document is bucketed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeWindow {
    Last24h,
    Last7d,
    Last30d,
    AllTime,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 4] = [
        TimeWindow::Last24h,
        TimeWindow::Last7d,
        TimeWindow::Last30d,
        TimeWindow::AllTime,
    ];

    /// Length of a bounded window; `None` for [`TimeWindow::AllTime`].
    pub fn span(self) -> Option<Duration> {
        match self {
            TimeWindow::Last24h => Some(Duration::hours(24)),
            TimeWindow::Last7d => Some(Duration::days(7)),
            TimeWindow::Last30d => Some(Duration::days(30)),
            TimeWindow::AllTime => None,
        }
    }

    /// `[now - span, now]`, or `None` when unbounded.
    pub fn bounds(self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.span().map(|span| (now - span, now))
    }

    pub fn is_bounded(self) -> bool {
        self.span().is_some()
    }
}

/// Milliseconds shared by `[start, end]` and `[range_start, range_end]`; 0 when disjoint.
pub fn overlap_ms(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> i64 {
    let overlap_start = start.max(range_start);
    let overlap_end = end.min(range_end);
    (overlap_end - overlap_start).num_milliseconds().max(0)
}

/// Truncates a timestamp to the start of its minute.
pub fn round_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::minutes(1)).unwrap_or(t)
}

/// Builds a UTC timestamp from epoch milliseconds (storage representation).
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}
