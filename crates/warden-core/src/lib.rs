//! warden-core - projection engine for the warden identity platform.
//!
//! Every state change in warden is an immutable domain event. This crate
//! turns the ordered, multi-tenant event stream into relational read models
//! ("projections") and keeps them current.
//!
//! # Architecture
//!
//! ```text
//! EventStore --> CatchUpTask --> Registry/Dispatcher --> StatementExecutor --> projection tables
//!                     |                                          |
//!                     +------------- checkpoint (same tx) -------+
//! ```
//!
//! # Modules
//!
//! - [`event`]: the event record, the closed set of event types and their
//!   typed payloads
//! - [`statement`]: dialect-neutral row mutations (insert/update/delete)
//! - [`schema`]: projection table definitions
//! - [`reducer`]: the reducer contract and the registry/dispatcher
//! - [`projection`]: the concrete projections (applications, user auth
//!   methods) and the tenant-wide cascade reducers
//! - [`executor`]: transactional execution of mutation batches on `SQLite`
//! - [`checkpoint`]: per-tenant projection checkpoints and failed events
//! - [`eventstore`]: `SQLite` adapter for the event store read/write contract
//! - [`scheduler`]: per-(projection, instance) catch-up tasks and their
//!   supervisor
//! - [`query`]: read-side queries over the projection tables
//! - [`domain`]: the state and type enums shared by projections and queries
//! - [`config`]: engine configuration
//! - [`db`]: the shared database handle

pub mod checkpoint;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod event;
pub mod eventstore;
pub mod executor;
pub mod projection;
pub mod query;
pub mod reducer;
pub mod scheduler;
pub mod schema;
pub mod statement;

#[cfg(test)]
pub(crate) mod testing;

pub use error::StorageError;
