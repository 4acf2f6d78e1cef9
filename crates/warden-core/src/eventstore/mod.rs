//! `SQLite` adapter for the event store.
//!
//! The engine only reads events; [`EventStore::append`] exists for the
//! command side and for tests. Sequences are assigned here: they strictly
//! increase within an instance, and each event links to its aggregate's
//! previous event through `previous_sequence`.
//!
//! Reads are served with bounded staleness. An event becomes visible once
//! it is older than the query's staleness window, which keeps readers off
//! rows a concurrent writer may still be committing. Creation dates never
//! decrease within an instance, so the visible events always form a prefix
//! of the instance's sequence.

// SQLite stores sequences as i64; event sequences never exceed i64::MAX.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row, TransactionBehavior, params, params_from_iter};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::db::{Database, decode_timestamp, encode_timestamp};
use crate::error::StorageError;
use crate::event::{AggregateType, Event, EventType};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

const EVENTS_TABLE: &str = "events";

const EVENT_COLUMNS: &str = "instance_id, sequence, aggregate_type, aggregate_id, resource_owner, \
                             event_type, previous_sequence, creation_date, payload";

/// Errors raised by the event store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EventStoreError {
    /// The aggregate advanced past the sequence the writer expected.
    #[error("aggregate {aggregate_id} is at sequence {actual}, expected {expected}")]
    Conflict {
        /// Aggregate id.
        aggregate_id: String,
        /// Sequence the writer based its events on.
        expected: u64,
        /// Current sequence of the aggregate.
        actual: u64,
    },

    /// An instance aggregate was addressed under another instance.
    #[error("instance aggregate {aggregate_id} cannot be written under instance {instance_id}")]
    InstanceMismatch {
        /// Instance the events were addressed to.
        instance_id: String,
        /// Id of the instance aggregate.
        aggregate_id: String,
    },

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A payload could not be serialised.
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            Self::Conflict { .. } | Self::InstanceMismatch { .. } | Self::Serialization(_) => false,
        }
    }
}

impl From<rusqlite::Error> for EventStoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.into())
    }
}

/// The aggregate new events are appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRef {
    /// Owning instance.
    pub instance_id: String,
    /// Aggregate type.
    pub aggregate_type: AggregateType,
    /// Aggregate id.
    pub aggregate_id: String,
    /// Owning organisation.
    pub resource_owner: String,
}

impl AggregateRef {
    /// Creates an aggregate reference.
    pub fn new(
        instance_id: impl Into<String>,
        aggregate_type: AggregateType,
        aggregate_id: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            aggregate_type,
            aggregate_id: aggregate_id.into(),
            resource_owner: resource_owner.into(),
        }
    }
}

/// An event waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    /// Wire event type.
    pub event_type: String,
    /// JSON payload.
    pub payload: Vec<u8>,
}

impl PendingEvent {
    /// Serialises `payload` for an event of type `event_type`.
    pub fn new<T: Serialize + ?Sized>(
        event_type: EventType,
        payload: &T,
    ) -> Result<Self, EventStoreError> {
        Ok(Self {
            event_type: event_type.as_str().into(),
            payload: serde_json::to_vec(payload)?,
        })
    }

    /// An event without payload.
    #[must_use]
    pub fn empty(event_type: EventType) -> Self {
        Self {
            event_type: event_type.as_str().into(),
            payload: Vec::new(),
        }
    }

    /// An event with an arbitrary wire type and payload.
    pub fn raw(event_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
        }
    }
}

/// Filter for [`EventStore::fetch_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// Instance to read.
    pub instance_id: String,
    /// Aggregate types to include. Empty matches nothing.
    pub aggregate_types: Vec<AggregateType>,
    /// Only events with a greater sequence are returned.
    pub after_sequence: u64,
    /// Page size.
    pub limit: usize,
    /// Events younger than this are not visible yet.
    pub staleness: Duration,
}

/// Event store over the shared database.
#[derive(Debug, Clone)]
pub struct EventStore {
    db: Database,
}

impl EventStore {
    /// Creates an event store over `db`. Call [`EventStore::initialize`]
    /// before first use.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates the event tables if they do not exist.
    pub fn initialize(&self) -> Result<(), StorageError> {
        self.db.with_conn(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
    }

    /// Appends `events` to an aggregate.
    ///
    /// `expected_sequence` is the sequence of the aggregate's latest event
    /// the writer has seen, 0 for a new aggregate.
    ///
    /// # Errors
    ///
    /// [`EventStoreError::Conflict`] if the aggregate has moved on, and
    /// [`EventStoreError::InstanceMismatch`] if an instance aggregate is
    /// addressed under a different instance. Nothing is appended in either
    /// case.
    pub fn append(
        &self,
        aggregate: &AggregateRef,
        expected_sequence: u64,
        events: Vec<PendingEvent>,
    ) -> Result<Vec<Event>, EventStoreError> {
        if aggregate.aggregate_type == AggregateType::Instance
            && aggregate.aggregate_id != aggregate.instance_id
        {
            return Err(EventStoreError::InstanceMismatch {
                instance_id: aggregate.instance_id.clone(),
                aggregate_id: aggregate.aggregate_id.clone(),
            });
        }
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let actual: i64 = tx.query_row(
                "SELECT COALESCE(MAX(sequence), 0) FROM events
                 WHERE instance_id = ?1 AND aggregate_type = ?2 AND aggregate_id = ?3",
                params![
                    aggregate.instance_id,
                    aggregate.aggregate_type.as_str(),
                    aggregate.aggregate_id
                ],
                |row| row.get(0),
            )?;
            let actual = actual as u64;
            if actual != expected_sequence {
                return Err(EventStoreError::Conflict {
                    aggregate_id: aggregate.aggregate_id.clone(),
                    expected: expected_sequence,
                    actual,
                });
            }

            let (head, last_created): (i64, Option<String>) = tx.query_row(
                "SELECT COALESCE(MAX(sequence), 0), MAX(creation_date) FROM events
                 WHERE instance_id = ?1",
                params![aggregate.instance_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            // Stored timestamps carry microseconds.
            let mut creation_date = Utc::now().trunc_subsecs(6);
            if let Some(last) = last_created {
                creation_date = creation_date.max(decode_timestamp(EVENTS_TABLE, &last)?);
            }

            let mut sequence = head as u64;
            let mut previous_sequence = actual;
            let mut appended = Vec::with_capacity(events.len());
            {
                let mut stmt = tx.prepare_cached(&format!(
                    "INSERT INTO events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ))?;
                for pending in events {
                    sequence += 1;
                    let event = Event {
                        instance_id: aggregate.instance_id.clone(),
                        aggregate_type: aggregate.aggregate_type.as_str().into(),
                        aggregate_id: aggregate.aggregate_id.clone(),
                        resource_owner: aggregate.resource_owner.clone(),
                        event_type: pending.event_type,
                        sequence,
                        previous_sequence,
                        creation_date,
                        payload: pending.payload,
                    };
                    insert(&mut stmt, &event)?;
                    previous_sequence = sequence;
                    appended.push(event);
                }
            }
            tx.commit()?;

            debug!(
                instance_id = %aggregate.instance_id,
                aggregate_id = %aggregate.aggregate_id,
                count = appended.len(),
                head = sequence,
                "appended events"
            );
            Ok(appended)
        })
    }

    /// Stores already sequenced events as they are, in one transaction.
    ///
    /// Used to load exported streams and to stage streams in tests.
    pub fn import(&self, events: &[Event]) -> Result<(), EventStoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(&format!(
                    "INSERT INTO events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ))?;
                for event in events {
                    insert(&mut stmt, event)?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Reads one page of events, ordered by sequence.
    pub fn fetch_events(&self, query: &EventQuery) -> Result<Vec<Event>, EventStoreError> {
        self.db.with_conn(|conn| fetch_in(conn, query, Utc::now()))
    }

    /// [`EventStore::fetch_events`] on the blocking pool.
    pub async fn fetch_events_async(
        &self,
        query: EventQuery,
    ) -> Result<Vec<Event>, EventStoreError> {
        self.db
            .run(move |conn| fetch_in(conn, &query, Utc::now()))
            .await
    }

    /// Instances with at least one event and no `instance.removed` event,
    /// sorted.
    pub fn active_instances(&self) -> Result<Vec<String>, EventStoreError> {
        self.db.with_conn(active_instances_in)
    }

    /// [`EventStore::active_instances`] on the blocking pool.
    pub async fn active_instances_async(&self) -> Result<Vec<String>, EventStoreError> {
        self.db.run(active_instances_in).await
    }

    /// Highest sequence of an instance, 0 if it has no events.
    pub fn latest_sequence(&self, instance_id: &str) -> Result<u64, EventStoreError> {
        self.db.with_conn(|conn| latest_sequence_in(conn, instance_id))
    }

    /// [`EventStore::latest_sequence`] on the blocking pool.
    pub async fn latest_sequence_async(&self, instance_id: String) -> Result<u64, EventStoreError> {
        self.db
            .run(move |conn| latest_sequence_in(conn, &instance_id))
            .await
    }
}

fn insert(stmt: &mut rusqlite::CachedStatement<'_>, event: &Event) -> Result<(), EventStoreError> {
    stmt.execute(params![
        event.instance_id,
        event.sequence as i64,
        event.aggregate_type,
        event.aggregate_id,
        event.resource_owner,
        event.event_type,
        event.previous_sequence as i64,
        encode_timestamp(event.creation_date),
        event.payload,
    ])?;
    Ok(())
}

fn fetch_in(
    conn: &Connection,
    query: &EventQuery,
    now: DateTime<Utc>,
) -> Result<Vec<Event>, EventStoreError> {
    if query.aggregate_types.is_empty() || query.limit == 0 {
        return Ok(Vec::new());
    }

    let window = TimeDelta::from_std(query.staleness).unwrap_or(TimeDelta::MAX);
    let cutoff = now
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let types = (0..query.aggregate_types.len())
        .map(|i| format!("?{}", i + 5))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE instance_id = ?1 AND sequence > ?2 AND creation_date <= ?3
           AND aggregate_type IN ({types})
         ORDER BY sequence ASC
         LIMIT ?4"
    );

    let mut values = vec![
        SqlValue::Text(query.instance_id.clone()),
        SqlValue::Integer(query.after_sequence as i64),
        SqlValue::Text(encode_timestamp(cutoff)),
        SqlValue::Integer(i64::try_from(query.limit).unwrap_or(i64::MAX)),
    ];
    values.extend(
        query
            .aggregate_types
            .iter()
            .map(|kind| SqlValue::Text(kind.as_str().into())),
    );

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), read_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(event, creation_date)| {
            Ok(Event {
                creation_date: decode_timestamp(EVENTS_TABLE, &creation_date)?,
                ..event
            })
        })
        .collect()
}

// The creation date is decoded by the caller so that a bad timestamp
// surfaces as a corrupt row rather than a driver error.
fn read_row(row: &Row<'_>) -> rusqlite::Result<(Event, String)> {
    Ok((
        Event {
            instance_id: row.get(0)?,
            sequence: row.get::<_, i64>(1)? as u64,
            aggregate_type: row.get(2)?,
            aggregate_id: row.get(3)?,
            resource_owner: row.get(4)?,
            event_type: row.get(5)?,
            previous_sequence: row.get::<_, i64>(6)? as u64,
            creation_date: DateTime::<Utc>::MIN_UTC,
            payload: row.get(8)?,
        },
        row.get(7)?,
    ))
}

fn active_instances_in(conn: &mut Connection) -> Result<Vec<String>, EventStoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT DISTINCT instance_id FROM events
         WHERE instance_id NOT IN (
             SELECT instance_id FROM events WHERE event_type = ?1
         )
         ORDER BY instance_id",
    )?;
    let instances = stmt
        .query_map(params![EventType::InstanceRemoved.as_str()], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(instances)
}

fn latest_sequence_in(conn: &mut Connection, instance_id: &str) -> Result<u64, EventStoreError> {
    let head: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence), 0) FROM events WHERE instance_id = ?1",
        params![instance_id],
        |row| row.get(0),
    )?;
    Ok(head as u64)
}
