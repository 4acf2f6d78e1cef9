//! Projection table definitions.
//!
//! A [`Table`] describes the relational shape a projection writes to. The
//! executor uses it to create tables on startup and to turn inserts into
//! idempotent upserts keyed by the primary key.

use std::fmt::Write as _;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// UTF-8 text.
    Text,
    /// Signed 64-bit integer.
    Int64,
    /// Boolean, stored as 0/1.
    Bool,
    /// RFC 3339 timestamp text with microsecond precision.
    Timestamp,
    /// Duration in nanoseconds.
    Interval,
    /// JSON array of strings.
    TextArray,
    /// JSON array of integers.
    IntArray,
    /// Arbitrary JSON document.
    Json,
}

impl ColumnType {
    const fn sql_type(self) -> &'static str {
        match self {
            Self::Text | Self::Timestamp | Self::TextArray | Self::IntArray | Self::Json => {
                "TEXT"
            },
            Self::Int64 | Self::Bool | Self::Interval => "INTEGER",
        }
    }
}

/// One column of a projection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: &'static str,
    /// Storage type.
    pub column_type: ColumnType,
    /// Whether `NULL` is accepted.
    pub nullable: bool,
    /// SQL default expression, if any.
    pub default: Option<&'static str>,
}

impl ColumnDef {
    /// A non-null column without default.
    #[must_use]
    pub const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            nullable: false,
            default: None,
        }
    }

    /// Allows `NULL`.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the SQL default expression.
    #[must_use]
    pub const fn default(mut self, expression: &'static str) -> Self {
        self.default = Some(expression);
        self
    }
}

/// A foreign key with `ON DELETE CASCADE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Referencing columns in this table.
    pub columns: Vec<&'static str>,
    /// Referenced table.
    pub references: &'static str,
    /// Referenced columns.
    pub referenced_columns: Vec<&'static str>,
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    /// Index name suffix; the full name is `<table>_<name>_idx`.
    pub name: &'static str,
    /// Indexed columns.
    pub columns: Vec<&'static str>,
}

/// Columns the owner-removed cascade writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerColumns {
    /// Resource owner column.
    pub owner: &'static str,
    /// Boolean soft-delete flag.
    pub removed_flag: &'static str,
    /// Change date column.
    pub change_date: &'static str,
    /// Sequence column.
    pub sequence: &'static str,
}

impl Default for OwnerColumns {
    fn default() -> Self {
        Self {
            owner: "resource_owner",
            removed_flag: "owner_removed",
            change_date: "change_date",
            sequence: "sequence",
        }
    }
}

/// A projection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Table name.
    pub name: &'static str,
    /// Column definitions, in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Primary key columns.
    pub primary_key: Vec<&'static str>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
    /// Secondary indices.
    pub indices: Vec<Index>,
    /// Column holding the instance id.
    pub tenant_column: &'static str,
    /// Owner columns, if the table takes part in the owner-removed cascade.
    pub owner: Option<OwnerColumns>,
}

impl Table {
    /// Creates a table with the given columns and primary key.
    #[must_use]
    pub fn new(
        name: &'static str,
        columns: Vec<ColumnDef>,
        primary_key: Vec<&'static str>,
    ) -> Self {
        Self {
            name,
            columns,
            primary_key,
            foreign_keys: Vec::new(),
            indices: Vec::new(),
            tenant_column: "instance_id",
            owner: None,
        }
    }

    /// Adds a cascading foreign key.
    #[must_use]
    pub fn with_foreign_key(
        mut self,
        columns: Vec<&'static str>,
        references: &'static str,
        referenced_columns: Vec<&'static str>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            columns,
            references,
            referenced_columns,
        });
        self
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn with_index(mut self, name: &'static str, columns: Vec<&'static str>) -> Self {
        self.indices.push(Index { name, columns });
        self
    }

    /// Enrols the table in the owner-removed cascade.
    #[must_use]
    pub const fn with_owner(mut self, owner: OwnerColumns) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Returns true if `column` is part of the primary key.
    #[must_use]
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.contains(&column)
    }

    /// Returns true if the table declares `column`.
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|def| def.name == column)
    }

    /// DDL creating the table and its indices if they do not exist.
    #[must_use]
    pub fn create_statements(&self) -> Vec<String> {
        let mut body: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let mut line = format!("{} {}", column.name, column.column_type.sql_type());
                if !column.nullable {
                    line.push_str(" NOT NULL");
                }
                if let Some(default) = column.default {
                    let _ = write!(line, " DEFAULT {default}");
                }
                line
            })
            .collect();
        body.push(format!("PRIMARY KEY ({})", self.primary_key.join(", ")));
        for fk in &self.foreign_keys {
            body.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE CASCADE",
                fk.columns.join(", "),
                fk.references,
                fk.referenced_columns.join(", ")
            ));
        }

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name,
            body.join(",\n    ")
        )];
        statements.extend(self.indices.iter().map(|index| {
            format!(
                "CREATE INDEX IF NOT EXISTS {}_{}_idx ON {} ({})",
                self.name,
                index.name,
                self.name,
                index.columns.join(", ")
            )
        }));
        statements
    }
}
