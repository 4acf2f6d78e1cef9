//! The per-`(projection, instance)` catch-up loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::TransactionBehavior;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{EngineContext, SchedulerError, TaskState, TaskStatus};
use crate::checkpoint::CheckpointStore;
use crate::error::StorageError;
use crate::event::{Event, EventType};
use crate::eventstore::EventQuery;
use crate::reducer::{Dispatch, RegisteredProjection};
use crate::statement::Mutation;

/// Result of one fetch-reduce-commit step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A page was committed.
    Applied {
        /// Events the checkpoint moved past.
        events: usize,
        /// New checkpoint.
        checkpoint: u64,
    },
    /// No visible events after the checkpoint.
    CaughtUp,
    /// The instance was removed; its rows and checkpoint are gone.
    Removed,
}

/// The reducible prefix of a page.
#[derive(Debug, Default)]
struct Page {
    mutations: Vec<Mutation>,
    applied: usize,
    last_sequence: u64,
    removed: bool,
    stop: Option<SchedulerError>,
}

/// Keeps one projection current for one instance.
#[derive(Debug)]
pub struct CatchUpTask {
    ctx: EngineContext,
    projection: Arc<RegisteredProjection>,
    instance_id: String,
    status: Arc<watch::Sender<TaskStatus>>,
}

impl CatchUpTask {
    /// Creates a task for the registered projection `projection`.
    pub fn new(
        ctx: EngineContext,
        projection: &str,
        instance_id: impl Into<String>,
    ) -> Result<Self, SchedulerError> {
        let projection = ctx
            .registry()
            .projection(projection)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownProjection(projection.to_owned()))?;
        let instance_id = instance_id.into();
        let (status, _) = watch::channel(TaskStatus::new(projection.name(), &instance_id));

        Ok(Self {
            ctx,
            projection,
            instance_id,
            status: Arc::new(status),
        })
    }

    /// Projection name.
    #[must_use]
    pub fn projection(&self) -> &'static str {
        self.projection.name()
    }

    /// Instance id.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Subscribes to status updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    fn set_state(&self, state: TaskState) {
        self.status.send_modify(|status| status.state = state);
    }

    /// Runs until cancelled, halted or removed, and returns the final state.
    ///
    /// Cancellation takes effect at the next suspension point. A commit
    /// already running on the blocking pool finishes or rolls back as a
    /// whole.
    pub async fn run(self, cancel: CancellationToken) -> TaskState {
        let name = self.projection.name();
        let config = self.ctx.config().clone();
        info!(projection = name, instance_id = %self.instance_id, "catch-up task started");

        let mut attempts: u32 = 0;
        let final_state = loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => break TaskState::Stopped,
                step = self.run_once() => step,
            };

            match step {
                Ok(StepOutcome::Applied { .. }) => {
                    attempts = 0;
                    self.status.send_modify(|status| {
                        status.attempts = 0;
                        status.last_error = None;
                    });
                },
                Ok(StepOutcome::CaughtUp) => {
                    attempts = 0;
                    self.status.send_modify(|status| {
                        status.state = TaskState::Idle;
                        status.attempts = 0;
                        status.last_error = None;
                    });
                    if !pause(&cancel, config.poll_interval).await {
                        break TaskState::Stopped;
                    }
                },
                Ok(StepOutcome::Removed) => break TaskState::Removed,
                Err(err) => {
                    attempts = attempts.saturating_add(1);
                    // Errors without an event point at the first unapplied sequence.
                    let sequence = err
                        .sequence()
                        .unwrap_or_else(|| self.status.borrow().checkpoint.saturating_add(1));
                    self.record_failure(sequence, &err).await;
                    let message = err.to_string();
                    self.status.send_modify(|status| {
                        status.attempts = attempts;
                        status.last_error = Some(message);
                    });

                    if !err.is_retryable() || attempts >= config.max_attempts {
                        error!(
                            projection = name,
                            instance_id = %self.instance_id,
                            sequence,
                            attempts,
                            error = %err,
                            "catch-up task halted"
                        );
                        break TaskState::Halted;
                    }

                    let delay = config.backoff.delay_for_attempt(attempts);
                    warn!(
                        projection = name,
                        instance_id = %self.instance_id,
                        sequence,
                        attempts,
                        delay = ?delay,
                        error = %err,
                        "batch failed, backing off"
                    );
                    self.set_state(TaskState::Backoff);
                    if !pause(&cancel, delay).await {
                        break TaskState::Stopped;
                    }
                },
            }
        };

        self.set_state(final_state);
        info!(
            projection = name,
            instance_id = %self.instance_id,
            state = %final_state,
            "catch-up task exited"
        );
        final_state
    }

    /// Fetches one page after the checkpoint, reduces it and commits the
    /// mutations together with the new checkpoint.
    ///
    /// If an event cannot be applied yet, the events before it are
    /// committed and the next step reports it.
    pub async fn run_once(&self) -> Result<StepOutcome, SchedulerError> {
        let name = self.projection.name();

        self.set_state(TaskState::Fetching);
        let instance_id = self.instance_id.clone();
        let checkpoint = self
            .ctx
            .db()
            .run(move |conn| CheckpointStore::load(conn, name, &instance_id))
            .await?;
        let after = checkpoint.as_ref().map_or(0, |c| c.last_sequence);
        self.status.send_modify(|status| {
            status.checkpoint = after;
            status.checkpoint_updated = checkpoint.as_ref().map(|c| c.last_updated);
        });

        let config = self.ctx.config();
        let events = self
            .ctx
            .events()
            .fetch_events_async(EventQuery {
                instance_id: self.instance_id.clone(),
                aggregate_types: self.projection.aggregate_types().iter().copied().collect(),
                after_sequence: after,
                limit: config.batch_size,
                staleness: config.staleness_window,
            })
            .await?;
        if events.is_empty() {
            return Ok(StepOutcome::CaughtUp);
        }

        self.set_state(TaskState::Dispatching);
        let page = self.reduce_page(&events, after);
        if page.applied == 0 {
            return match page.stop {
                Some(err) => Err(err),
                None => Ok(StepOutcome::CaughtUp),
            };
        }
        if let Some(stop) = &page.stop {
            debug!(
                projection = name,
                instance_id = %self.instance_id,
                events = page.applied,
                reason = %stop,
                "committing page prefix"
            );
        }

        self.set_state(TaskState::Executing);
        let Page {
            mutations,
            applied,
            last_sequence,
            removed,
            stop,
        } = page;
        let clear_failures = stop.is_none();
        let executor = Arc::clone(self.ctx.executor());
        let status = Arc::clone(&self.status);
        let instance_id = self.instance_id.clone();
        let now = Utc::now();

        let report = self
            .ctx
            .db()
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let report = executor.execute_in(&tx, &mutations)?;

                status.send_modify(|status| status.state = TaskState::Checkpointing);
                if removed {
                    CheckpointStore::delete_in(&tx, name, &instance_id)?;
                } else {
                    CheckpointStore::save_in(&tx, name, &instance_id, last_sequence, now)?;
                    if clear_failures {
                        CheckpointStore::clear_failures_in(&tx, name, &instance_id)?;
                    }
                }
                tx.commit()?;
                Ok::<_, StorageError>(report)
            })
            .await?;

        debug!(
            projection = name,
            instance_id = %self.instance_id,
            events = applied,
            mutations = report.affected.len(),
            rows = report.total(),
            checkpoint = last_sequence,
            "committed batch"
        );
        self.status.send_modify(|status| {
            status.checkpoint = last_sequence;
            status.checkpoint_updated = Some(now);
        });

        if removed {
            info!(projection = name, instance_id = %self.instance_id, "instance removed");
            return Ok(StepOutcome::Removed);
        }
        Ok(StepOutcome::Applied {
            events: applied,
            checkpoint: last_sequence,
        })
    }

    /// Reduces events in order until one cannot be applied yet.
    ///
    /// An event is in order when its aggregate predecessor is covered by the
    /// checkpoint or was the last event of that aggregate earlier in the
    /// page.
    fn reduce_page(&self, events: &[Event], checkpoint: u64) -> Page {
        let mut page = Page::default();
        let mut heads: HashMap<(&str, &str), u64> = HashMap::new();

        for event in events {
            let aggregate = (event.aggregate_type.as_str(), event.aggregate_id.as_str());
            let in_order = event.previous_sequence <= checkpoint
                || heads.get(&aggregate) == Some(&event.previous_sequence);
            if !in_order {
                page.stop = Some(SchedulerError::OutOfOrder {
                    sequence: event.sequence,
                    previous_sequence: event.previous_sequence,
                });
                break;
            }

            match self.projection.reduce(event) {
                Ok(Dispatch::Skipped) => {},
                Ok(Dispatch::Mutations(mutations)) => page.mutations.extend(mutations),
                Err(source) => {
                    page.stop = Some(SchedulerError::Reduce {
                        sequence: event.sequence,
                        source,
                    });
                    break;
                },
            }

            heads.insert(aggregate, event.sequence);
            page.applied += 1;
            page.last_sequence = event.sequence;

            if event.kind() == Some(EventType::InstanceRemoved) {
                page.removed = true;
                break;
            }
        }
        page
    }

    async fn record_failure(&self, sequence: u64, err: &SchedulerError) {
        let name = self.projection.name();
        let instance_id = self.instance_id.clone();
        let message = err.to_string();
        let recorded = self
            .ctx
            .db()
            .run(move |conn| {
                CheckpointStore::record_failure(conn, name, &instance_id, sequence, &message, Utc::now())
            })
            .await;

        match recorded {
            Ok(count) => debug!(projection = name, sequence, count, "recorded failed event"),
            Err(e) => warn!(
                projection = name,
                instance_id = %self.instance_id,
                sequence,
                error = %e,
                "failed to record failed event"
            ),
        }
    }
}

/// Sleeps for `duration`; false if cancelled first.
pub(super) async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
