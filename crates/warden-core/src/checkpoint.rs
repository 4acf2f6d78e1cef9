//! Per-tenant projection checkpoints and failed-event bookkeeping.
//!
//! A checkpoint records the last event sequence a projection applied for one
//! instance. It lives in the same database as the projection tables and is
//! written through the caller's transaction ([`CheckpointStore::save_in`]),
//! so it can never run ahead of or behind the rows it describes.
//!
//! Failed events are recorded per `(projection, instance, sequence)` with a
//! failure count, for operators and the status report.

// SQLite stores sequences as i64; event sequences never exceed i64::MAX.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::db::{decode_timestamp, encode_timestamp};
use crate::error::StorageError;

const CHECKPOINT_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS projection_checkpoints (
    projection_name TEXT NOT NULL,
    instance_id TEXT NOT NULL,
    last_sequence INTEGER NOT NULL,
    last_updated TEXT NOT NULL,
    PRIMARY KEY (projection_name, instance_id)
);

CREATE TABLE IF NOT EXISTS projection_failed_events (
    projection_name TEXT NOT NULL,
    instance_id TEXT NOT NULL,
    failed_sequence INTEGER NOT NULL,
    failure_count INTEGER NOT NULL,
    error TEXT NOT NULL,
    last_failed TEXT NOT NULL,
    PRIMARY KEY (projection_name, instance_id, failed_sequence)
);
";

const CHECKPOINT_TABLE: &str = "projection_checkpoints";
const FAILED_EVENTS_TABLE: &str = "projection_failed_events";

/// Progress of one projection for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Projection name.
    pub projection_name: String,
    /// Instance id.
    pub instance_id: String,
    /// Sequence of the last applied event.
    pub last_sequence: u64,
    /// When the checkpoint was last written.
    pub last_updated: DateTime<Utc>,
}

/// An event a projection failed to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEvent {
    /// Projection name.
    pub projection_name: String,
    /// Instance id.
    pub instance_id: String,
    /// Sequence of the failing event.
    pub failed_sequence: u64,
    /// How often applying it failed.
    pub failure_count: u32,
    /// Last error message.
    pub error: String,
    /// When it last failed.
    pub last_failed: DateTime<Utc>,
}

/// Checkpoint and failed-event storage.
///
/// All functions take a [`Connection`]; pass a `Transaction` (which derefs to
/// one) to take part in a larger unit of work.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointStore;

impl CheckpointStore {
    /// Creates the checkpoint tables if they do not exist.
    pub fn initialize(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(CHECKPOINT_SCHEMA)?;
        Ok(())
    }

    /// Loads the checkpoint of `projection` for `instance_id`.
    pub fn load(
        conn: &Connection,
        projection: &str,
        instance_id: &str,
    ) -> Result<Option<Checkpoint>, StorageError> {
        let row = conn
            .query_row(
                "SELECT last_sequence, last_updated FROM projection_checkpoints
                 WHERE projection_name = ?1 AND instance_id = ?2",
                params![projection, instance_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(sequence, updated)| {
            Ok(Checkpoint {
                projection_name: projection.to_owned(),
                instance_id: instance_id.to_owned(),
                last_sequence: sequence as u64,
                last_updated: decode_timestamp(CHECKPOINT_TABLE, &updated)?,
            })
        })
        .transpose()
    }

    /// Creates or advances a checkpoint. A checkpoint never moves backwards.
    pub fn save_in(
        conn: &Connection,
        projection: &str,
        instance_id: &str,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        conn.prepare_cached(
            "INSERT INTO projection_checkpoints (projection_name, instance_id, last_sequence, last_updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (projection_name, instance_id) DO UPDATE SET
                 last_sequence = MAX(last_sequence, excluded.last_sequence),
                 last_updated = excluded.last_updated",
        )?
        .execute(params![
            projection,
            instance_id,
            sequence as i64,
            encode_timestamp(now)
        ])?;
        Ok(())
    }

    /// Deletes a checkpoint and the failures recorded with it.
    pub fn delete_in(
        conn: &Connection,
        projection: &str,
        instance_id: &str,
    ) -> Result<(), StorageError> {
        conn.execute(
            "DELETE FROM projection_checkpoints WHERE projection_name = ?1 AND instance_id = ?2",
            params![projection, instance_id],
        )?;
        Self::clear_failures_in(conn, projection, instance_id)
    }

    /// Instances that have a checkpoint for `projection`, sorted.
    pub fn instances(conn: &Connection, projection: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = conn.prepare_cached(
            "SELECT instance_id FROM projection_checkpoints
             WHERE projection_name = ?1 ORDER BY instance_id",
        )?;
        let instances = stmt
            .query_map(params![projection], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(instances)
    }

    /// Records a failure to apply the event at `sequence` and returns how
    /// often it has failed so far.
    pub fn record_failure(
        conn: &Connection,
        projection: &str,
        instance_id: &str,
        sequence: u64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, StorageError> {
        let count: i64 = conn.query_row(
            "INSERT INTO projection_failed_events
                 (projection_name, instance_id, failed_sequence, failure_count, error, last_failed)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)
             ON CONFLICT (projection_name, instance_id, failed_sequence) DO UPDATE SET
                 failure_count = failure_count + 1,
                 error = excluded.error,
                 last_failed = excluded.last_failed
             RETURNING failure_count",
            params![
                projection,
                instance_id,
                sequence as i64,
                error,
                encode_timestamp(now)
            ],
            |row| row.get(0),
        )?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Failures recorded for `projection` and `instance_id`, by sequence.
    pub fn failures(
        conn: &Connection,
        projection: &str,
        instance_id: &str,
    ) -> Result<Vec<FailedEvent>, StorageError> {
        let mut stmt = conn.prepare_cached(
            "SELECT failed_sequence, failure_count, error, last_failed
             FROM projection_failed_events
             WHERE projection_name = ?1 AND instance_id = ?2
             ORDER BY failed_sequence",
        )?;
        let rows = stmt
            .query_map(params![projection, instance_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(sequence, count, error, last_failed)| {
                Ok(FailedEvent {
                    projection_name: projection.to_owned(),
                    instance_id: instance_id.to_owned(),
                    failed_sequence: sequence as u64,
                    failure_count: u32::try_from(count).unwrap_or(u32::MAX),
                    error,
                    last_failed: decode_timestamp(FAILED_EVENTS_TABLE, &last_failed)?,
                })
            })
            .collect()
    }

    /// Forgets recorded failures, once the events have been applied.
    pub fn clear_failures_in(
        conn: &Connection,
        projection: &str,
        instance_id: &str,
    ) -> Result<(), StorageError> {
        conn.prepare_cached(
            "DELETE FROM projection_failed_events WHERE projection_name = ?1 AND instance_id = ?2",
        )?
        .execute(params![projection, instance_id])?;
        Ok(())
    }
}
