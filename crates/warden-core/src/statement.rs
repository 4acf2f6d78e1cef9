//! Dialect-neutral row mutations.
//!
//! A [`Mutation`] is the intent to insert, update or delete rows of one
//! projection table. It carries typed values only and never SQL text; the
//! [`executor`](crate::executor) renders it with positional parameters.
//!
//! Update and delete mutations take a [`Predicate`], and the only way to
//! build one is [`Predicate::tenant`]. Every predicate therefore scopes its
//! rows by the owning instance before any other condition is added.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// UTF-8 text.
    Text(String),
    /// Signed 64-bit integer. Enumerations and sequences are stored as
    /// integers.
    Int(i64),
    /// Boolean flag.
    Bool(bool),
    /// Point in time, UTC.
    Timestamp(DateTime<Utc>),
    /// Elapsed time.
    Interval(Duration),
    /// Ordered list of strings.
    TextArray(Vec<String>),
    /// Ordered list of integers.
    IntArray(Vec<i64>),
    /// Opaque JSON document (encrypted secrets, for instance).
    Json(serde_json::Value),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Duration> for Value {
    fn from(value: Duration) -> Self {
        Self::Interval(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Self::TextArray(value)
    }
}

impl From<Vec<i64>> for Value {
    fn from(value: Vec<i64>) -> Self {
        Self::IntArray(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A column assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name.
    pub name: &'static str,
    /// Value to write.
    pub value: Value,
}

impl Column {
    /// Creates a column assignment.
    pub fn new(name: &'static str, value: impl Into<Value>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// An equality condition `column = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Column name.
    pub column: &'static str,
    /// Expected value.
    pub value: Value,
}

/// A conjunction of equality conditions, always led by the tenant scope.
#[derive(Debug, Clone)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    /// Starts a predicate scoped to one instance.
    pub fn tenant(column: &'static str, instance_id: impl Into<String>) -> Self {
        Self {
            conditions: vec![Condition {
                column,
                value: Value::Text(instance_id.into()),
            }],
        }
    }

    /// Adds `column = value` to the conjunction.
    #[must_use]
    pub fn and(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            column,
            value: value.into(),
        });
        self
    }

    /// The tenant condition this predicate was started with.
    #[must_use]
    pub fn tenant_condition(&self) -> &Condition {
        &self.conditions[0]
    }

    /// All conditions, tenant first.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

/// Predicates compare as sets: the order conditions were added in is not
/// significant.
impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .all(|condition| other.conditions.contains(condition))
    }
}

/// Kind of row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Adds a row.
    Insert,
    /// Changes the rows matching a predicate.
    Update,
    /// Removes the rows matching a predicate.
    Delete,
}

/// A single row-level write against a projection table.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    table: &'static str,
    operation: Operation,
    columns: Vec<Column>,
    predicate: Option<Predicate>,
}

impl Mutation {
    /// Inserts one row.
    #[must_use]
    pub const fn insert(table: &'static str, columns: Vec<Column>) -> Self {
        Self {
            table,
            operation: Operation::Insert,
            columns,
            predicate: None,
        }
    }

    /// Updates the rows matching `predicate`.
    #[must_use]
    pub const fn update(table: &'static str, columns: Vec<Column>, predicate: Predicate) -> Self {
        Self {
            table,
            operation: Operation::Update,
            columns,
            predicate: Some(predicate),
        }
    }

    /// Deletes the rows matching `predicate`.
    #[must_use]
    pub const fn delete(table: &'static str, predicate: Predicate) -> Self {
        Self {
            table,
            operation: Operation::Delete,
            columns: Vec::new(),
            predicate: Some(predicate),
        }
    }

    /// Target table.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        self.table
    }

    /// Kind of write.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Column assignments, in order. Empty for deletes.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Row filter. `None` for inserts.
    #[must_use]
    pub const fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    /// Value assigned to `name`, if the mutation writes that column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| &column.value)
    }
}
