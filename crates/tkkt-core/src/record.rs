//! Change records and rows.

use crate::dataset::{Dataset, SchemaError};
use crate::hlc::Timestamp;
use crate::value::{CodecError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use ulid::Ulid;

/// Identifier grouping the change records of one logical edit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single column-level change, the unit of the append-only log.
///
/// `hlc` is unique across the whole log; a record is never modified once
/// created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub dataset: Dataset,
    pub row_id: String,
    pub batch_id: BatchId,
    pub col: String,
    /// Encoded with [`Value::encode`].
    pub val: String,
    pub hlc: Timestamp,
    pub actor: String,
}

impl ChangeRecord {
    /// The decoded value carried by this record.
    pub fn value(&self) -> Result<Value, CodecError> {
        Value::decode(&self.val)
    }

    /// The `(dataset, row, column)` this record competes for.
    pub fn cell(&self) -> (Dataset, &str, &str) {
        (self.dataset, &self.row_id, &self.col)
    }
}

/// An explicit mapping of column name to value for one record.
///
/// Columns iterate in byte order of their names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    id: String,
    columns: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Builder-style [`Row::set`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Check every column against the dataset schema.
    pub fn validate(&self, dataset: Dataset) -> Result<(), SchemaError> {
        for (column, value) in &self.columns {
            dataset.validate(column, value)?;
        }
        Ok(())
    }

    /// The columns of `self` whose value differs from `existing`.
    ///
    /// A column absent from `existing` counts as null.
    pub fn changes_from(&self, existing: &Row) -> Row {
        let columns = self
            .columns
            .iter()
            .filter(|(column, value)| existing.get(column).unwrap_or(&Value::Null) != *value)
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        Row {
            id: self.id.clone(),
            columns,
        }
    }
}
