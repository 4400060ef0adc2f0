//! Fire-and-forget stats recomputation on a background worker.
//!
//! Jobs go through an unbounded channel to one worker task, so callers (ingest, sweeper, triggers)
//! never wait on aggregation.

use crate::stats::StatsEngine;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// A unit of recompute work for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputeJob {
    pub group_id: String,
    /// `None` recomputes every user with history in the group.
    pub user_ids: Option<Vec<String>>,
    /// Delete the group's stats before recomputing.
    pub reset: bool,
}

impl RecomputeJob {
    pub fn users(group_id: &str, user_ids: Vec<String>) -> Self {
        Self {
            group_id: group_id.to_string(),
            user_ids: Some(user_ids),
            reset: false,
        }
    }

    pub fn group(group_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            user_ids: None,
            reset: false,
        }
    }

    pub fn reset(group_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            user_ids: None,
            reset: true,
        }
    }

    /// A job naming an empty user list has nothing to do.
    pub fn is_noop(&self) -> bool {
        !self.reset && self.user_ids.as_ref().is_some_and(|ids| ids.is_empty())
    }
}

/// Where detector and sweeper send recompute work. Must not block.
pub trait RecomputeScheduler: Send + Sync {
    fn schedule(&self, job: RecomputeJob);
}

enum Command {
    Run(RecomputeJob),
    Flush(oneshot::Sender<()>),
}

/// Handle to the recompute worker; cheap to clone.
#[derive(Clone)]
pub struct RecomputeDispatcher {
    sender: mpsc::UnboundedSender<Command>,
}

impl RecomputeDispatcher {
    /// Spawns the worker on the current tokio runtime. It stops once every handle is dropped.
    pub fn start(engine: Arc<StatsEngine>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Command>();

        tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                match command {
                    Command::Run(job) => {
                        debug!(group_id = %job.group_id, reset = job.reset, "step: recompute job started");
                        match engine.run_job(&job, Utc::now()).await {
                            Ok(report) => info!(
                                group_id = %report.group_id,
                                updated = report.updated.len(),
                                failed = report.failed.len(),
                                "step: recompute job done"
                            ),
                            Err(e) => error!(group_id = %job.group_id, error = %e, "Recompute job failed"),
                        }
                    }
                    Command::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!("Recompute worker stopped");
        });

        Self { sender }
    }

    /// Resolves once every job queued before this call has finished.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

impl RecomputeScheduler for RecomputeDispatcher {
    fn schedule(&self, job: RecomputeJob) {
        if job.is_noop() {
            return;
        }
        if self.sender.send(Command::Run(job)).is_err() {
            error!("Recompute worker is not running; job dropped");
        }
    }
}
