//! Instance discovery and task supervision.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::task::{CatchUpTask, pause};
use super::{EngineContext, SchedulerError, TaskState, TaskStatus};
use crate::checkpoint::CheckpointStore;
use crate::error::StorageError;

/// Status of one task at the time of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionReport {
    /// Projection name.
    pub projection: &'static str,
    /// Instance id.
    pub instance_id: String,
    /// Task state.
    pub state: TaskState,
    /// Last committed sequence.
    pub checkpoint: u64,
    /// Time since the checkpoint was written, `None` before the first
    /// commit.
    pub staleness: Option<Duration>,
    /// Failed attempts at the current batch.
    pub attempts: u32,
    /// Most recent error.
    pub last_error: Option<String>,
}

impl ProjectionReport {
    fn from_status(status: &TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            projection: status.projection,
            instance_id: status.instance_id.clone(),
            state: status.state,
            checkpoint: status.checkpoint,
            staleness: status
                .checkpoint_updated
                .and_then(|updated| (now - updated).to_std().ok()),
            attempts: status.attempts,
            last_error: status.last_error.clone(),
        }
    }
}

type TaskKey = (&'static str, String);

#[derive(Debug)]
struct TaskHandle {
    status: watch::Receiver<TaskStatus>,
    join: JoinHandle<TaskState>,
}

impl TaskHandle {
    fn state(&self) -> TaskState {
        self.status.borrow().state
    }
}

/// Runs one [`CatchUpTask`] per `(projection, instance)` pair.
///
/// Instances are the event store's active instances plus every instance
/// that still holds a checkpoint, so a removed instance is picked up once
/// more to apply its removal.
#[derive(Debug)]
pub struct Supervisor {
    ctx: EngineContext,
    cancel: CancellationToken,
    tasks: BTreeMap<TaskKey, TaskHandle>,
}

impl Supervisor {
    /// Creates a supervisor. Cancelling `cancel` stops it and every task.
    #[must_use]
    pub fn new(ctx: EngineContext, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            cancel,
            tasks: BTreeMap::new(),
        }
    }

    /// Discovers instances until cancelled, then stops all tasks and
    /// returns their final report.
    pub async fn run(mut self) -> Vec<ProjectionReport> {
        let interval = self.ctx.config().discovery_interval;
        info!(
            projections = self.ctx.registry().projections().len(),
            discovery_interval = ?interval,
            "supervisor started"
        );

        loop {
            match self.discover().await {
                Ok(0) => {},
                Ok(spawned) => info!(spawned, tasks = self.tasks.len(), "spawned catch-up tasks"),
                Err(e) => warn!(error = %e, "instance discovery failed"),
            }
            if !pause(&self.cancel, interval).await {
                break;
            }
        }

        self.shutdown().await
    }

    /// Spawns tasks for pairs that have none and returns how many were
    /// spawned. Tasks of removed instances are forgotten; halted tasks stay
    /// until [`Supervisor::resume`].
    pub async fn discover(&mut self) -> Result<usize, SchedulerError> {
        // Forget removed tasks before reading checkpoints. A task that
        // finishes its removal after this point stays in the map until the
        // next pass, so its pair is never respawned.
        self.tasks.retain(|(projection, instance_id), handle| {
            let removed = handle.state() == TaskState::Removed;
            if removed {
                debug!(projection, instance_id = %instance_id, "forgetting removed instance");
            }
            !removed
        });

        let active = self.ctx.events().active_instances_async().await?;
        let names: Vec<&'static str> = self
            .ctx
            .registry()
            .projections()
            .iter()
            .map(|projection| projection.name())
            .collect();

        let checkpointed = self
            .ctx
            .db()
            .run(move |conn| {
                let mut pairs = Vec::new();
                for name in names {
                    for instance_id in CheckpointStore::instances(conn, name)? {
                        pairs.push((name, instance_id));
                    }
                }
                Ok::<_, StorageError>(pairs)
            })
            .await?;

        let mut wanted: BTreeSet<TaskKey> = checkpointed.into_iter().collect();
        for projection in self.ctx.registry().projections() {
            for instance_id in &active {
                wanted.insert((projection.name(), instance_id.clone()));
            }
        }

        let mut spawned = 0;
        for (projection, instance_id) in wanted {
            if !self.tasks.contains_key(&(projection, instance_id.clone())) {
                self.spawn(projection, instance_id)?;
                spawned += 1;
            }
        }
        Ok(spawned)
    }

    fn spawn(&mut self, projection: &'static str, instance_id: String) -> Result<(), SchedulerError> {
        let task = CatchUpTask::new(self.ctx.clone(), projection, instance_id.clone())?;
        let status = task.subscribe();
        let join = tokio::spawn(task.run(self.cancel.child_token()));
        self.tasks
            .insert((projection, instance_id), TaskHandle { status, join });
        Ok(())
    }

    /// Restarts a halted task. Returns false if the task is not halted.
    pub fn resume(&mut self, projection: &str, instance_id: &str) -> Result<bool, SchedulerError> {
        let Some((&(name, _), handle)) = self
            .tasks
            .iter()
            .find(|((name, id), _)| *name == projection && id == instance_id)
        else {
            return Ok(false);
        };
        if handle.state() != TaskState::Halted {
            return Ok(false);
        }

        info!(projection = name, instance_id, "resuming halted task");
        self.spawn(name, instance_id.to_owned())?;
        Ok(true)
    }

    /// Subscribes to the status of one task.
    #[must_use]
    pub fn status(&self, projection: &str, instance_id: &str) -> Option<watch::Receiver<TaskStatus>> {
        self.tasks
            .iter()
            .find(|((name, id), _)| *name == projection && id == instance_id)
            .map(|(_, handle)| handle.status.clone())
    }

    /// Current status of every task, ordered by projection and instance.
    #[must_use]
    pub fn report(&self) -> Vec<ProjectionReport> {
        self.tasks
            .values()
            .map(|handle| ProjectionReport::from_status(&handle.status.borrow()))
            .collect()
    }

    /// Cancels every task, waits for them to exit and returns the final
    /// report.
    pub async fn shutdown(mut self) -> Vec<ProjectionReport> {
        self.cancel.cancel();
        for ((projection, instance_id), handle) in &mut self.tasks {
            if let Err(e) = (&mut handle.join).await {
                warn!(projection, instance_id = %instance_id, error = %e, "catch-up task panicked");
            }
        }
        let report = self.report();
        info!(tasks = report.len(), "supervisor stopped");
        report
    }
}
