//! Stdin driver for `occupancy serve`: one JSON snapshot per line.
//!
//! Line shape: `{"groupId": "...", "takenAt": "<rfc3339>"?, "rooms": [...]}`. Lines that fail to parse
//! or validate are logged and skipped.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use occupancy_core::{RoomSnapshot, Snapshot};
use occupancy_tracker::OccupancyTracker;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotLine {
    #[serde(alias = "guildId")]
    pub group_id: String,
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
    #[serde(alias = "channels")]
    pub rooms: Vec<RoomSnapshot>,
}

impl SnapshotLine {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).context("Parse snapshot line")
    }

    pub fn into_snapshot(self, now: DateTime<Utc>) -> (String, Snapshot) {
        let taken_at = self.taken_at.unwrap_or(now);
        (self.group_id, Snapshot::new(taken_at, self.rooms))
    }
}

/// Counters reported when the input ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServeSummary {
    pub ingested: usize,
    pub rejected: usize,
}

/// Reads snapshot lines until EOF and ingests each one.
pub async fn ingest_lines<R>(tracker: &OccupancyTracker, reader: R) -> Result<ServeSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = ServeSummary::default();

    while let Some(line) = lines.next_line().await.context("Read snapshot line")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed = match SnapshotLine::parse(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Skipping unparsable snapshot line");
                summary.rejected += 1;
                continue;
            }
        };

        let (group_id, snapshot) = parsed.into_snapshot(Utc::now());
        match tracker.ingest(&group_id, snapshot).await {
            Ok(report) => {
                summary.ingested += 1;
                info!(group_id = %group_id, outcome = ?report.outcome, "step: snapshot ingested");
            }
            Err(e) => {
                summary.rejected += 1;
                warn!(group_id = %group_id, error = %e, "Snapshot rejected");
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use occupancy_core::TrackerConfig;

    #[test]
    fn test_parse_line_with_aliases() {
        let line = SnapshotLine::parse(
            r#"{"guildId":"g1","takenAt":"2024-05-01T10:00:00Z","channels":[{"channelId":"r1","members":[{"memberId":"a"}]}]}"#,
        )
        .unwrap();
        assert_eq!(line.group_id, "g1");
        assert_eq!(line.rooms[0].room_id, "r1");

        let (group_id, snapshot) = line.into_snapshot(Utc::now());
        assert_eq!(group_id, "g1");
        assert_eq!(snapshot.taken_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_missing_taken_at_uses_now() {
        let now = Utc::now();
        let line = SnapshotLine::parse(r#"{"groupId":"g1","rooms":[]}"#).unwrap();
        let (_, snapshot) = line.into_snapshot(now);
        assert_eq!(snapshot.taken_at, now);
    }

    #[tokio::test]
    async fn test_ingest_lines_counts_rejections() {
        let config = TrackerConfig {
            database_url: "sqlite::memory:".to_string(),
            round_to_minute: false,
            ..TrackerConfig::default()
        };
        let tracker = OccupancyTracker::open(config).await.unwrap();
        let input = concat!(
            r#"{"groupId":"g1","takenAt":"2024-05-01T10:00:00Z","rooms":[{"roomId":"r1","members":[{"memberId":"a"}]}]}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"groupId":"g1","takenAt":"2024-05-01T10:01:00Z","rooms":[{"roomId":"r1","members":[{"memberId":"a"}]},{"roomId":"r2","members":[{"memberId":"a"}]}]}"#,
            "\n",
        );

        let summary = ingest_lines(&tracker, input.as_bytes()).await.unwrap();

        assert_eq!(summary, ServeSummary { ingested: 1, rejected: 2 });
        assert_eq!(tracker.list_sessions("g1", None, None).await.unwrap().len(), 1);
    }
}
