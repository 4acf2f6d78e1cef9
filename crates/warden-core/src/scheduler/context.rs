//! Shared engine state handed to every task.

use std::sync::Arc;

use crate::checkpoint::CheckpointStore;
use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::error::StorageError;
use crate::eventstore::EventStore;
use crate::executor::StatementExecutor;
use crate::reducer::Registry;

/// Everything a catch-up task needs, cheap to clone.
#[derive(Debug, Clone)]
pub struct EngineContext {
    db: Database,
    events: EventStore,
    registry: Arc<Registry>,
    executor: Arc<StatementExecutor>,
    config: SchedulerConfig,
}

impl EngineContext {
    /// Builds a context over `db`. The executor covers every table of
    /// `registry`.
    #[must_use]
    pub fn new(db: Database, registry: Registry, config: SchedulerConfig) -> Self {
        let executor = StatementExecutor::from_registry(&registry);
        Self {
            events: EventStore::new(db.clone()),
            db,
            registry: Arc::new(registry),
            executor: Arc::new(executor),
            config,
        }
    }

    /// Creates the event, checkpoint and projection tables.
    pub fn initialize(&self) -> Result<(), StorageError> {
        self.events.initialize()?;
        self.db.with_conn(|conn| {
            CheckpointStore::initialize(conn)?;
            self.executor.ensure_tables(conn)
        })
    }

    /// Database handle.
    #[must_use]
    pub const fn db(&self) -> &Database {
        &self.db
    }

    /// Event store.
    #[must_use]
    pub const fn events(&self) -> &EventStore {
        &self.events
    }

    /// Registered projections.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Executor over the registered tables.
    #[must_use]
    pub fn executor(&self) -> &Arc<StatementExecutor> {
        &self.executor
    }

    /// Scheduling settings.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}
