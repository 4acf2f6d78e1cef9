//! Reducer and projection traits.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::event::{AggregateType, Event, EventType};
use crate::schema::Table;
use crate::statement::Mutation;

/// Errors a reducer can return. Both halt the projection: retrying cannot
/// change the outcome for the same event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReduceError {
    /// The reducer was handed an event of another type.
    #[error("reducer for {expected} received event of type {received}")]
    InvalidArgument {
        /// Type the reducer handles.
        expected: EventType,
        /// Wire type of the event it received.
        received: String,
    },

    /// The payload did not decode into the event type's shape.
    #[error("malformed {event_type} payload: {reason}")]
    MalformedEvent {
        /// Type of the offending event.
        event_type: EventType,
        /// Decoder message.
        reason: String,
    },
}

/// Signature shared by all reducers.
pub type ReduceFn = Arc<dyn Fn(&Event) -> Result<Vec<Mutation>, ReduceError> + Send + Sync>;

/// A reducer bound to the event type it handles.
#[derive(Clone)]
pub struct EventReducer {
    event_type: EventType,
    reduce: ReduceFn,
}

impl EventReducer {
    /// Binds `reduce` to `event_type`.
    pub fn new<F>(event_type: EventType, reduce: F) -> Self
    where
        F: Fn(&Event) -> Result<Vec<Mutation>, ReduceError> + Send + Sync + 'static,
    {
        Self {
            event_type,
            reduce: Arc::new(reduce),
        }
    }

    /// The event type this reducer handles.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Runs the reducer.
    pub fn reduce(&self, event: &Event) -> Result<Vec<Mutation>, ReduceError> {
        (self.reduce)(event)
    }
}

impl fmt::Debug for EventReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReducer")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

/// A read model: its tables and the reducers that maintain them.
pub trait Projection {
    /// Unique projection name, used as the checkpoint key.
    fn name(&self) -> &'static str;

    /// Tables the projection writes to, parents before children.
    fn tables(&self) -> Vec<Table>;

    /// One reducer per handled event type.
    fn reducers(&self) -> Vec<EventReducer>;

    /// Aggregate types whose events the projection reads. Defaults to the
    /// aggregates of the handled event types.
    fn aggregate_types(&self) -> BTreeSet<AggregateType> {
        self.reducers()
            .iter()
            .map(|reducer| reducer.event_type().aggregate_type())
            .collect()
    }
}
