//! Run teardown.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::tasks::TaskScheduler;
use crate::fetcher::RateLimitedFetcher;
use crate::types::{Event, TaskReport};

/// Finalizes a run after aggregation, a run-level error or an interrupt
pub(crate) struct ShutdownCoordinator {
    grace: Duration,
    event_tx: broadcast::Sender<Event>,
}

impl ShutdownCoordinator {
    pub(crate) fn new(grace: Duration, event_tx: broadcast::Sender<Event>) -> Self {
        Self { grace, event_tx }
    }

    /// Tear down whatever the run managed to set up
    ///
    /// This method performs the shutdown sequence:
    /// 1. Cancels the run token (fetches return `None` at their next suspension)
    /// 2. Waits up to the grace period for live tasks, then aborts them
    /// 3. Marks every non-terminal task cancelled
    /// 4. Drops the HTTP session
    ///
    /// Returns the final task reports.
    pub(crate) async fn finalize(
        &self,
        run_token: Option<&CancellationToken>,
        scheduler: Option<TaskScheduler>,
        session: Option<Arc<RateLimitedFetcher>>,
    ) -> Vec<TaskReport> {
        tracing::debug!("finalizing run");

        if let Some(token) = run_token {
            token.cancel();
        }

        let reports = match scheduler {
            Some(mut scheduler) => {
                scheduler.shutdown(self.grace).await;
                let reports = scheduler.reports();
                // Drops the scheduler's context and its handle on the session
                drop(scheduler);
                reports
            }
            None => Vec::new(),
        };

        if let Some(session) = session {
            drop(session);
            tracing::debug!("HTTP session closed");
        }

        self.event_tx.send(Event::ShutdownComplete).ok();
        tracing::info!("shutdown complete");
        reports
    }
}
