//! Static per-dataset schemas.
//!
//! Each dataset is a logical table whose materialized rows are keyed by
//! `id`. Change records may only target the columns declared here.

use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Name of the identifying column shared by every dataset.
pub const KEY_COLUMN: &str = "id";

/// Errors raised when data does not fit a dataset schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Unknown column {column:?} for dataset {dataset}")]
    UnknownColumn { dataset: Dataset, column: String },

    #[error("Type mismatch for {dataset}.{column}: expected {expected}, found {found}")]
    TypeMismatch {
        dataset: Dataset,
        column: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Column {dataset}.{column} cannot be null")]
    NullNotAllowed { dataset: Dataset, column: String },
}

/// Declaration of one materialized column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ValueKind,
    pub nullable: bool,
}

impl ColumnSpec {
    const fn nullable(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
        }
    }

    /// A non-nullable boolean flag defaulting to false.
    const fn flag(name: &'static str) -> Self {
        Self {
            name,
            kind: ValueKind::Boolean,
            nullable: false,
        }
    }

    /// SQL column definition used when bootstrapping the materialized table.
    pub fn sql_definition(&self) -> String {
        let sql_type = match self.kind {
            ValueKind::Number => "NUMERIC",
            ValueKind::Text => "TEXT",
            ValueKind::Boolean => "BOOLEAN",
        };
        if self.nullable {
            format!("\"{}\" {}", self.name, sql_type)
        } else {
            format!("\"{}\" {} NOT NULL DEFAULT 0", self.name, sql_type)
        }
    }
}

const EVENT_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::nullable("name", ValueKind::Text),
    ColumnSpec::nullable("maxTickets", ValueKind::Number),
    ColumnSpec::flag("tombstone"),
];

const STUDENT_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::nullable("sid", ValueKind::Text),
    ColumnSpec::nullable("eventId", ValueKind::Text),
    ColumnSpec::nullable("name", ValueKind::Text),
    ColumnSpec::flag("tombstone"),
];

const ADMIN_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::nullable("name", ValueKind::Text),
    ColumnSpec::nullable("eventId", ValueKind::Text),
    ColumnSpec::flag("tombstone"),
];

const TICKET_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::nullable("studentSid", ValueKind::Text),
    ColumnSpec::nullable("eventId", ValueKind::Text),
    ColumnSpec::flag("redeemed"),
    ColumnSpec::flag("tombstone"),
];

const ACCESS_LOG_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::nullable("studentSid", ValueKind::Text),
    ColumnSpec::nullable("eventId", ValueKind::Text),
    ColumnSpec::nullable("adminId", ValueKind::Text),
    ColumnSpec::nullable("timestamp", ValueKind::Text),
];

/// A logical table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Events,
    Students,
    Admins,
    Tickets,
    AccessStudentLogs,
}

impl Dataset {
    pub const ALL: [Dataset; 5] = [
        Dataset::Events,
        Dataset::Students,
        Dataset::Admins,
        Dataset::Tickets,
        Dataset::AccessStudentLogs,
    ];

    /// Dataset name, also the name of its materialized table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Events => "events",
            Dataset::Students => "students",
            Dataset::Admins => "admins",
            Dataset::Tickets => "tickets",
            Dataset::AccessStudentLogs => "access_student_logs",
        }
    }

    /// The non-key columns, in declaration order.
    pub fn columns(&self) -> &'static [ColumnSpec] {
        match self {
            Dataset::Events => EVENT_COLUMNS,
            Dataset::Students => STUDENT_COLUMNS,
            Dataset::Admins => ADMIN_COLUMNS,
            Dataset::Tickets => TICKET_COLUMNS,
            Dataset::AccessStudentLogs => ACCESS_LOG_COLUMNS,
        }
    }

    pub fn column(&self, name: &str) -> Option<&'static ColumnSpec> {
        self.columns().iter().find(|c| c.name == name)
    }

    /// Noun used when a record has no name of its own.
    pub fn generic_name(&self) -> &'static str {
        match self {
            Dataset::Events => "event",
            Dataset::Students => "student",
            Dataset::Admins => "admin",
            Dataset::Tickets => "ticket",
            Dataset::AccessStudentLogs => "access log",
        }
    }

    /// Look up a column, failing for anything outside the static schema.
    pub fn require_column(&self, name: &str) -> Result<&'static ColumnSpec, SchemaError> {
        self.column(name).ok_or_else(|| SchemaError::UnknownColumn {
            dataset: *self,
            column: name.to_string(),
        })
    }

    /// Check that `value` may be stored in column `name`.
    pub fn validate(&self, name: &str, value: &Value) -> Result<&'static ColumnSpec, SchemaError> {
        let spec = self.require_column(name)?;
        match value.kind() {
            None if !spec.nullable => Err(SchemaError::NullNotAllowed {
                dataset: *self,
                column: name.to_string(),
            }),
            Some(found) if found != spec.kind => Err(SchemaError::TypeMismatch {
                dataset: *self,
                column: name.to_string(),
                expected: spec.kind,
                found,
            }),
            _ => Ok(spec),
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dataset::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownDataset(s.to_string()))
    }
}
