//! Reducer contract and the registry that dispatches events to reducers.
//!
//! A reducer is a pure function from one event to the list of row mutations
//! that bring a projection up to date with it. It performs no I/O, so the
//! same event always yields the same mutations; replaying a batch after a
//! crash is therefore safe once the executor has made inserts idempotent.
//!
//! # Architecture
//!
//! ```text
//! Event --> Registry::dispatch(projection) --> EventReducer --> Vec<Mutation>
//!                  |
//!           Dispatch::Skipped (unregistered type, unsubscribed aggregate)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_core::reducer::{EventReducer, Projection};
//!
//! struct Counter;
//!
//! impl Projection for Counter {
//!     fn name(&self) -> &'static str { "projections.counter" }
//!     fn tables(&self) -> Vec<Table> { vec![counter_table()] }
//!     fn reducers(&self) -> Vec<EventReducer> {
//!         vec![EventReducer::new(EventType::ApplicationAdded, reduce_added)]
//!     }
//! }
//! ```

mod registry;
mod traits;


pub use registry::{Dispatch, RegisteredProjection, Registry, RegistryError};
pub use traits::{EventReducer, Projection, ReduceError, ReduceFn};
