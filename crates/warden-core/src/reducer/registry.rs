//! Static `(projection, event type) -> reducer` table.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use super::traits::{EventReducer, Projection, ReduceError};
use crate::event::{AggregateType, Event, EventType};
use crate::schema::Table;
use crate::statement::Mutation;

/// Wiring errors detected while registering projections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// Two projections share a name.
    #[error("projection {name} is already registered")]
    DuplicateProjection {
        /// Projection name.
        name: String,
    },

    /// A projection registers two reducers for one event type.
    #[error("projection {projection} registers more than one reducer for {event_type}")]
    DuplicateReducer {
        /// Projection name.
        projection: String,
        /// Event type registered twice.
        event_type: EventType,
    },

    /// A projection has no reducers or no tables.
    #[error("projection {name} has no reducers or no tables")]
    EmptyProjection {
        /// Projection name.
        name: String,
    },

    /// A table is declared twice, within one projection or across two.
    #[error("table {table} of projection {projection} is already registered")]
    DuplicateTable {
        /// Projection declaring the table a second time.
        projection: String,
        /// Table name.
        table: String,
    },

    /// A reducer handles an event type whose aggregate the projection does
    /// not read.
    #[error("projection {projection} handles {event_type} but does not read its aggregate")]
    UnsubscribedAggregate {
        /// Projection name.
        projection: String,
        /// Event type of the unreachable reducer.
        event_type: EventType,
    },
}

/// Outcome of dispatching one event to one projection.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The projection does not handle this event. Its checkpoint still
    /// advances past it.
    Skipped,
    /// Mutations to apply. May be empty when the event changes nothing.
    Mutations(Vec<Mutation>),
}

/// A projection as held by the registry.
#[derive(Debug)]
pub struct RegisteredProjection {
    name: &'static str,
    tables: Vec<Table>,
    aggregate_types: BTreeSet<AggregateType>,
    reducers: HashMap<EventType, EventReducer>,
}

impl RegisteredProjection {
    /// Projection name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Tables, parents before children.
    #[must_use]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Aggregate types the projection reads.
    #[must_use]
    pub const fn aggregate_types(&self) -> &BTreeSet<AggregateType> {
        &self.aggregate_types
    }

    /// Event types with a registered reducer.
    pub fn event_types(&self) -> impl Iterator<Item = EventType> + '_ {
        self.reducers.keys().copied()
    }

    /// Reduces `event`, or skips it if the projection does not handle it.
    pub fn reduce(&self, event: &Event) -> Result<Dispatch, ReduceError> {
        let subscribed = event
            .aggregate_kind()
            .is_some_and(|kind| self.aggregate_types.contains(&kind));
        if !subscribed {
            return Ok(Dispatch::Skipped);
        }
        let Some(reducer) = event.kind().and_then(|kind| self.reducers.get(&kind)) else {
            return Ok(Dispatch::Skipped);
        };
        reducer.reduce(event).map(Dispatch::Mutations)
    }
}

/// The set of registered projections.
///
/// Built once at startup and shared read-only (`Arc<Registry>`) by all
/// catch-up tasks.
#[derive(Debug, Default)]
pub struct Registry {
    projections: Vec<Arc<RegisteredProjection>>,
    by_name: HashMap<&'static str, usize>,
    table_names: HashSet<&'static str>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a projection.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the projection is miswired or clashes
    /// with one registered earlier.
    pub fn register<P: Projection>(&mut self, projection: &P) -> Result<(), RegistryError> {
        self.register_parts(
            projection.name(),
            projection.tables(),
            projection.aggregate_types(),
            projection.reducers(),
        )
    }

    /// Registers a projection from its parts.
    ///
    /// # Errors
    ///
    /// See [`Registry::register`].
    pub fn register_parts(
        &mut self,
        name: &'static str,
        tables: Vec<Table>,
        aggregate_types: BTreeSet<AggregateType>,
        reducers: Vec<EventReducer>,
    ) -> Result<(), RegistryError> {
        if self.by_name.contains_key(name) {
            return Err(RegistryError::DuplicateProjection { name: name.into() });
        }
        if tables.is_empty() || reducers.is_empty() {
            return Err(RegistryError::EmptyProjection { name: name.into() });
        }

        let mut seen_tables = HashSet::new();
        for table in &tables {
            if self.table_names.contains(table.name) || !seen_tables.insert(table.name) {
                return Err(RegistryError::DuplicateTable {
                    projection: name.into(),
                    table: table.name.into(),
                });
            }
        }

        let mut by_type = HashMap::with_capacity(reducers.len());
        for reducer in reducers {
            let event_type = reducer.event_type();
            if !aggregate_types.contains(&event_type.aggregate_type()) {
                return Err(RegistryError::UnsubscribedAggregate {
                    projection: name.into(),
                    event_type,
                });
            }
            if by_type.insert(event_type, reducer).is_some() {
                return Err(RegistryError::DuplicateReducer {
                    projection: name.into(),
                    event_type,
                });
            }
        }

        self.table_names.extend(seen_tables);
        self.by_name.insert(name, self.projections.len());
        self.projections.push(Arc::new(RegisteredProjection {
            name,
            tables,
            aggregate_types,
            reducers: by_type,
        }));
        Ok(())
    }

    /// Looks up a projection by name.
    #[must_use]
    pub fn projection(&self, name: &str) -> Option<&Arc<RegisteredProjection>> {
        self.by_name.get(name).map(|&index| &self.projections[index])
    }

    /// All projections, in registration order.
    #[must_use]
    pub fn projections(&self) -> &[Arc<RegisteredProjection>] {
        &self.projections
    }

    /// All tables of all projections, in registration order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.projections
            .iter()
            .flat_map(|projection| projection.tables.iter())
    }

    /// Dispatches `event` to the named projection. Unknown projections skip
    /// every event.
    pub fn dispatch(&self, projection: &str, event: &Event) -> Result<Dispatch, ReduceError> {
        self.projection(projection)
            .map_or(Ok(Dispatch::Skipped), |projection| projection.reduce(event))
    }
}
