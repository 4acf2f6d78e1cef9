//! Catch-up scheduling.
//!
//! One [`CatchUpTask`] runs per `(projection, instance)` pair. A task reads
//! the instance's events after its checkpoint in bounded pages, reduces
//! them, and commits the page's mutations together with the new checkpoint
//! in one transaction:
//!
//! ```text
//! Idle -> Fetching -> Dispatching -> Executing -> Checkpointing -> Idle
//!                          |               |
//!                          +--> Backoff ---+--> Fetching
//!                          +--> Halted
//! ```
//!
//! Tasks share nothing but the [`EngineContext`]; halting one never affects
//! another. The [`Supervisor`] discovers instances, spawns the tasks and
//! reports their [`TaskStatus`].

mod context;
mod supervisor;
mod task;

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use context::EngineContext;
pub use supervisor::{ProjectionReport, Supervisor};
pub use task::{CatchUpTask, StepOutcome};

use crate::error::StorageError;
use crate::eventstore::EventStoreError;
use crate::reducer::ReduceError;

/// Errors raised while catching up.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerError {
    /// A reducer rejected an event.
    #[error("event {sequence} could not be reduced: {source}")]
    Reduce {
        /// Sequence of the rejected event.
        sequence: u64,
        /// Reducer error.
        #[source]
        source: ReduceError,
    },

    /// An event arrived before its aggregate predecessor.
    #[error("event {sequence} follows {previous_sequence}, which has not been applied yet")]
    OutOfOrder {
        /// Sequence of the deferred event.
        sequence: u64,
        /// Aggregate predecessor that is still missing.
        previous_sequence: u64,
    },

    /// The relational store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The event store failed.
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    /// No projection with this name is registered.
    #[error("unknown projection: {0}")]
    UnknownProjection(String),
}

impl SchedulerError {
    /// Returns true if the same batch may succeed on a later attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::OutOfOrder { .. } => true,
            Self::Storage(e) => e.is_retryable(),
            Self::EventStore(e) => e.is_retryable(),
            Self::Reduce { .. } | Self::UnknownProjection(_) => false,
        }
    }

    /// Sequence of the event the error is about, if known.
    #[must_use]
    pub const fn sequence(&self) -> Option<u64> {
        match self {
            Self::Reduce { sequence, .. } | Self::OutOfOrder { sequence, .. } => Some(*sequence),
            Self::Storage(_) | Self::EventStore(_) | Self::UnknownProjection(_) => None,
        }
    }
}

/// Lifecycle state of a catch-up task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskState {
    /// Caught up, waiting for the next poll.
    #[default]
    Idle,
    /// Reading the next page of events.
    Fetching,
    /// Running reducers over the page.
    Dispatching,
    /// Applying the page's mutations.
    Executing,
    /// Writing the checkpoint.
    Checkpointing,
    /// Waiting before retrying a failed batch.
    Backoff,
    /// Stopped on a permanent failure or after too many attempts.
    Halted,
    /// Cancelled.
    Stopped,
    /// The instance was removed and its checkpoint deleted.
    Removed,
}

impl TaskState {
    /// Returns true once the task has exited.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Halted | Self::Stopped | Self::Removed)
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Dispatching => "dispatching",
            Self::Executing => "executing",
            Self::Checkpointing => "checkpointing",
            Self::Backoff => "backoff",
            Self::Halted => "halted",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable status of one task, published through a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    /// Projection name.
    pub projection: &'static str,
    /// Instance id.
    pub instance_id: String,
    /// Current state.
    pub state: TaskState,
    /// Last committed sequence.
    pub checkpoint: u64,
    /// When the checkpoint was last written.
    pub checkpoint_updated: Option<DateTime<Utc>>,
    /// Failed attempts at the current batch.
    pub attempts: u32,
    /// Most recent error, cleared on the next commit.
    pub last_error: Option<String>,
}

impl TaskStatus {
    fn new(projection: &'static str, instance_id: &str) -> Self {
        Self {
            projection,
            instance_id: instance_id.to_owned(),
            state: TaskState::Idle,
            checkpoint: 0,
            checkpoint_updated: None,
            attempts: 0,
            last_error: None,
        }
    }
}
