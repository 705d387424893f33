//! Concurrent producer tasks with primary/fallback chaining
//!
//! Every enabled entry gets one tokio task for its primary. When a primary
//! settles, the scheduler decides about its fallback: spawned if the
//! primary failed (error or panic) or produced no records, otherwise
//! recorded as `NotScheduled`. Fallbacks never chain further.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bundle::BundleContext;
use crate::error::{Error, Result};
use crate::producer::{Producer, ProducerEntry};
use crate::types::{Event, Record, TaskReport, TaskRole, TaskStatus};

/// What a finished tokio task hands back to the scheduler
pub(crate) struct TaskCompletion {
    id: usize,
    outcome: std::result::Result<Vec<Record>, String>,
}

struct TaskSlot {
    name: String,
    role: TaskRole,
    status: TaskStatus,
    producer: Arc<dyn Producer>,
    /// Slot of this primary's fallback
    fallback: Option<usize>,
}

/// Runs producer tasks and tracks their status
pub(crate) struct TaskScheduler {
    ctx: BundleContext,
    slots: Vec<TaskSlot>,
    join_set: JoinSet<TaskCompletion>,
    event_tx: broadcast::Sender<Event>,
    /// Records of succeeded tasks, in completion order
    records: Vec<Record>,
}

impl TaskScheduler {
    pub(crate) fn new(ctx: BundleContext, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            ctx,
            slots: Vec::new(),
            join_set: JoinSet::new(),
            event_tx,
            records: Vec::new(),
        }
    }

    /// Register every entry and spawn the primaries
    pub(crate) fn launch(&mut self, entries: Vec<ProducerEntry>) {
        for entry in entries {
            let primary_name = entry.primary.name().to_string();
            let primary_id = self.slots.len();
            self.slots.push(TaskSlot {
                name: primary_name.clone(),
                role: TaskRole::Primary,
                status: TaskStatus::Pending,
                producer: entry.primary,
                fallback: None,
            });

            if let Some(fallback) = entry.fallback {
                let fallback_id = self.slots.len();
                self.slots.push(TaskSlot {
                    name: fallback.name().to_string(),
                    role: TaskRole::Fallback {
                        primary: primary_name,
                    },
                    status: TaskStatus::Pending,
                    producer: fallback,
                    fallback: None,
                });
                self.slots[primary_id].fallback = Some(fallback_id);
            }

            self.spawn(primary_id);
        }
        tracing::info!(tasks = self.join_set.len(), "producer tasks launched");
    }

    fn spawn(&mut self, id: usize) {
        let slot = &mut self.slots[id];
        slot.status = TaskStatus::Running;
        let producer = slot.producer.clone();
        let name = slot.name.clone();
        let role = slot.role.clone();
        let ctx = self.ctx.clone();

        tracing::debug!(producer = %name, ?role, "starting task");
        self.event_tx.send(Event::TaskStarted { name, role }).ok();

        self.join_set.spawn(async move {
            let outcome = match AssertUnwindSafe(producer.collect(&ctx)).catch_unwind().await {
                Ok(Ok(records)) => Ok(records),
                Ok(Err(e)) => Err(e.to_string()),
                Err(panic) => Err(panic_message(panic.as_ref())),
            };
            TaskCompletion { id, outcome }
        });
    }

    /// Process completions until no task is live
    ///
    /// Returns [`Error::ShuttingDown`] as soon as `shutdown` fires.
    pub(crate) async fn drive(&mut self, shutdown: &CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::warn!(live = self.join_set.len(), "shutdown requested while tasks were running");
                    return Err(Error::ShuttingDown);
                }
                joined = self.join_set.join_next() => match joined {
                    None => return Ok(()),
                    Some(Ok(completion)) => self.settle(completion),
                    Some(Err(e)) => tracing::warn!(error = %e, "producer task did not complete"),
                },
            }
        }
    }

    fn settle(&mut self, completion: TaskCompletion) {
        let TaskCompletion { id, outcome } = completion;
        let status = match outcome {
            Ok(records) => {
                let count = records.len();
                self.records.extend(records);
                TaskStatus::Succeeded { records: count }
            }
            Err(error) => {
                tracing::warn!(producer = %self.slots[id].name, error = %error, "producer failed");
                TaskStatus::Failed { error }
            }
        };

        if !self.finish(id, status.clone()) {
            return;
        }

        let (primary_name, fallback) = {
            let slot = &self.slots[id];
            if slot.role != TaskRole::Primary {
                return;
            }
            match slot.fallback {
                Some(fallback) => (slot.name.clone(), fallback),
                None => return,
            }
        };
        let fallback_name = self.slots[fallback].name.clone();

        if self.ctx.is_cancelled() {
            self.finish(fallback, TaskStatus::Cancelled);
        } else if status.triggers_fallback() {
            tracing::info!(primary = %primary_name, fallback = %fallback_name, "primary produced nothing, running fallback");
            self.event_tx
                .send(Event::FallbackScheduled {
                    primary: primary_name,
                    fallback: fallback_name,
                })
                .ok();
            self.spawn(fallback);
        } else {
            self.finish(fallback, TaskStatus::NotScheduled);
            self.event_tx
                .send(Event::FallbackSkipped {
                    primary: primary_name,
                    fallback: fallback_name,
                })
                .ok();
        }
    }

    /// Move a task to a terminal status; later transitions are ignored
    fn finish(&mut self, id: usize, status: TaskStatus) -> bool {
        let slot = &mut self.slots[id];
        if slot.status.is_terminal() {
            tracing::debug!(producer = %slot.name, current = ?slot.status, ignored = ?status, "task already terminal");
            return false;
        }
        slot.status = status.clone();
        tracing::debug!(producer = %slot.name, ?status, "task finished");
        self.event_tx
            .send(Event::TaskFinished {
                name: slot.name.clone(),
                role: slot.role.clone(),
                status,
            })
            .ok();
        true
    }

    /// Give live tasks `grace` to unwind, abort the rest, mark them cancelled
    ///
    /// The run's cancellation token must already be cancelled.
    pub(crate) async fn shutdown(&mut self, grace: Duration) {
        let live = self.join_set.len();
        if live > 0 {
            tracing::debug!(live, grace_ms = grace.as_millis() as u64, "waiting for tasks to unwind");
            let drained = tokio::time::timeout(grace, async {
                while let Some(joined) = self.join_set.join_next().await {
                    if let Ok(completion) = joined {
                        self.settle(completion);
                    }
                }
            })
            .await;

            if drained.is_err() {
                tracing::warn!(remaining = self.join_set.len(), "tasks still running after grace period, aborting");
            }
            self.join_set.abort_all();
            self.join_set.detach_all();
        }

        for id in 0..self.slots.len() {
            if !self.slots[id].status.is_terminal() {
                self.finish(id, TaskStatus::Cancelled);
            }
        }
    }

    /// Hand over the collected records
    pub(crate) fn take_records(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.records)
    }

    /// Final status of every task, in registration order
    pub(crate) fn reports(&self) -> Vec<TaskReport> {
        self.slots
            .iter()
            .map(|slot| TaskReport {
                name: slot.name.clone(),
                role: slot.role.clone(),
                status: slot.status.clone(),
            })
            .collect()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("producer panicked: {detail}")
}
