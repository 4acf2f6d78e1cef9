//! Transactional execution of mutation batches on `SQLite`.
//!
//! A batch is applied all or nothing. Values are always bound positionally.
//! Inserts are rendered as upserts on the table's primary key, so replaying
//! a batch after a crash between commit and acknowledgement leaves the
//! tables unchanged. Updates and deletes that match no rows are not errors;
//! the affected-row count is reported per mutation.
//!
//! Mutations are validated against the registered table catalog before any
//! SQL reaches the database: unknown tables or columns, inserts without the
//! tenant column and updates without columns are rejected as
//! [`StorageError::InvalidStatement`].

use std::collections::HashMap;
use std::fmt::Write as _;

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, ToSql, Transaction, params_from_iter};
use tracing::{debug, trace};

use crate::db::encode_timestamp;
use crate::error::StorageError;
use crate::reducer::Registry;
use crate::schema::Table;
use crate::statement::{Mutation, Operation, Value};

fn json_text<T: serde::Serialize + ?Sized>(value: &T) -> rusqlite::Result<ToSqlOutput<'static>> {
    serde_json::to_string(value)
        .map(|text| ToSqlOutput::Owned(SqlValue::Text(text)))
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Null => Ok(ToSqlOutput::Owned(SqlValue::Null)),
            Self::Text(text) => Ok(ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes()))),
            Self::Int(value) => Ok(ToSqlOutput::Owned(SqlValue::Integer(*value))),
            Self::Bool(value) => Ok(ToSqlOutput::Owned(SqlValue::Integer(i64::from(*value)))),
            Self::Timestamp(at) => Ok(ToSqlOutput::Owned(SqlValue::Text(encode_timestamp(*at)))),
            Self::Interval(duration) => Ok(ToSqlOutput::Owned(SqlValue::Integer(
                i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX),
            ))),
            Self::TextArray(values) => json_text(values),
            Self::IntArray(values) => json_text(values),
            Self::Json(value) => json_text(value),
        }
    }
}

/// A mutation rendered to SQL with its positional parameters.
#[derive(Debug, PartialEq)]
pub struct Rendered<'a> {
    /// SQL text with `?N` placeholders.
    pub sql: String,
    /// Values bound to the placeholders, in order.
    pub params: Vec<&'a Value>,
}

fn invalid(table: &Table, reason: impl Into<String>) -> StorageError {
    StorageError::InvalidStatement {
        table: table.name.into(),
        reason: reason.into(),
    }
}

/// Renders `mutation` for `table`.
///
/// # Errors
///
/// [`StorageError::InvalidStatement`] if the mutation does not fit the
/// table.
pub fn render<'a>(mutation: &'a Mutation, table: &Table) -> Result<Rendered<'a>, StorageError> {
    for column in mutation.columns() {
        if !table.has_column(column.name) {
            return Err(invalid(table, format!("unknown column {}", column.name)));
        }
    }
    if let Some(predicate) = mutation.predicate() {
        if predicate.tenant_condition().column != table.tenant_column {
            return Err(invalid(
                table,
                format!(
                    "predicate is scoped by {} instead of {}",
                    predicate.tenant_condition().column,
                    table.tenant_column
                ),
            ));
        }
        for condition in predicate.conditions() {
            if !table.has_column(condition.column) {
                return Err(invalid(
                    table,
                    format!("unknown predicate column {}", condition.column),
                ));
            }
        }
    }

    let mut params: Vec<&Value> = Vec::new();
    let mut sql = String::new();
    match mutation.operation() {
        Operation::Insert => {
            if mutation.column(table.tenant_column).is_none() {
                return Err(invalid(table, "insert does not set the tenant column"));
            }
            let names: Vec<&str> = mutation.columns().iter().map(|c| c.name).collect();
            let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
            params.extend(mutation.columns().iter().map(|c| &c.value));
            let _ = write!(
                sql,
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO ",
                table.name,
                names.join(", "),
                placeholders.join(", "),
                table.primary_key.join(", ")
            );
            let updates: Vec<String> = names
                .iter()
                .filter(|name| !table.is_primary_key(name))
                .map(|name| format!("{name} = excluded.{name}"))
                .collect();
            if updates.is_empty() {
                sql.push_str("NOTHING");
            } else {
                let _ = write!(sql, "UPDATE SET {}", updates.join(", "));
            }
        },
        Operation::Update => {
            if mutation.columns().is_empty() {
                return Err(invalid(table, "update without columns"));
            }
            let assignments: Vec<String> = mutation
                .columns()
                .iter()
                .enumerate()
                .map(|(i, column)| format!("{} = ?{}", column.name, i + 1))
                .collect();
            params.extend(mutation.columns().iter().map(|c| &c.value));
            let _ = write!(sql, "UPDATE {} SET {}", table.name, assignments.join(", "));
        },
        Operation::Delete => {
            let _ = write!(sql, "DELETE FROM {}", table.name);
        },
    }

    if let Some(predicate) = mutation.predicate() {
        let conditions: Vec<String> = predicate
            .conditions()
            .iter()
            .enumerate()
            .map(|(i, condition)| format!("{} = ?{}", condition.column, params.len() + i + 1))
            .collect();
        params.extend(predicate.conditions().iter().map(|c| &c.value));
        let _ = write!(sql, " WHERE {}", conditions.join(" AND "));
    }

    Ok(Rendered { sql, params })
}

/// Rows affected by each mutation of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Affected rows, one entry per mutation in batch order.
    pub affected: Vec<usize>,
}

impl ExecutionReport {
    /// Total rows affected.
    #[must_use]
    pub fn total(&self) -> usize {
        self.affected.iter().sum()
    }
}

/// Applies mutation batches to the registered projection tables.
#[derive(Debug, Clone, Default)]
pub struct StatementExecutor {
    tables: HashMap<&'static str, Table>,
    order: Vec<&'static str>,
}

impl StatementExecutor {
    /// Creates an executor over `tables`, given parents before children.
    #[must_use]
    pub fn new(tables: impl IntoIterator<Item = Table>) -> Self {
        let mut executor = Self::default();
        for table in tables {
            executor.order.push(table.name);
            executor.tables.insert(table.name, table);
        }
        executor
    }

    /// Creates an executor over every table of `registry`.
    #[must_use]
    pub fn from_registry(registry: &Registry) -> Self {
        Self::new(registry.tables().cloned())
    }

    /// Looks up a table definition.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Creates all tables and indices that do not exist yet.
    pub fn ensure_tables(&self, conn: &mut Connection) -> Result<(), StorageError> {
        let tx = conn.transaction()?;
        for name in &self.order {
            if let Some(table) = self.tables.get(name) {
                for statement in table.create_statements() {
                    tx.execute(&statement, [])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Applies `batch` in its own transaction.
    pub fn execute(
        &self,
        conn: &mut Connection,
        batch: &[Mutation],
    ) -> Result<ExecutionReport, StorageError> {
        let tx = conn.transaction()?;
        let report = self.execute_in(&tx, batch)?;
        tx.commit()?;
        Ok(report)
    }

    /// Applies `batch` inside a transaction owned by the caller. Nothing is
    /// committed here; on error the caller's transaction must be dropped.
    pub fn execute_in(
        &self,
        tx: &Transaction<'_>,
        batch: &[Mutation],
    ) -> Result<ExecutionReport, StorageError> {
        let mut affected = Vec::with_capacity(batch.len());
        for mutation in batch {
            let table = self.tables.get(mutation.table()).ok_or_else(|| {
                StorageError::InvalidStatement {
                    table: mutation.table().into(),
                    reason: "table is not registered".into(),
                }
            })?;
            let rendered = render(mutation, table)?;
            trace!(sql = %rendered.sql, "executing mutation");

            let mut stmt = tx.prepare_cached(&rendered.sql)?;
            let rows = stmt.execute(params_from_iter(rendered.params.iter()))?;
            if rows == 0 && mutation.operation() != Operation::Insert {
                debug!(
                    table = mutation.table(),
                    operation = ?mutation.operation(),
                    "mutation matched no rows"
                );
            }
            affected.push(rows);
        }
        Ok(ExecutionReport { affected })
    }
}
