//! In-memory reduction of a change log.
//!
//! A [`Reduction`] maps every `(dataset, row, column)` cell to the LWW
//! register of all records seen for it. It is the specification the
//! materialized tables must always agree with, and it is used directly to
//! rebuild them.

use crate::dataset::Dataset;
use crate::lattice::Lattice;
use crate::lwwreg::LwwRegister;
use crate::record::{ChangeRecord, Row};
use crate::value::CodecError;
use std::collections::BTreeMap;

type CellKey = (Dataset, String, String);

/// The LWW reduction of a set of change records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reduction {
    cells: BTreeMap<CellKey, LwwRegister>,
}

impl Reduction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ChangeRecord>) -> Self {
        let mut reduction = Self::new();
        for record in records {
            reduction.absorb(record);
        }
        reduction
    }

    /// Fold one record in; returns true if it now holds its cell.
    pub fn absorb(&mut self, record: &ChangeRecord) -> bool {
        let key = (record.dataset, record.row_id.clone(), record.col.clone());
        self.cells.entry(key).or_default().absorb(record)
    }

    pub fn cell(&self, dataset: Dataset, row_id: &str, col: &str) -> Option<&LwwRegister> {
        self.cells
            .get(&(dataset, row_id.to_string(), col.to_string()))
    }

    /// Number of cells with at least one write.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The reduced rows of one dataset, keyed by row id.
    ///
    /// Only columns that were ever written appear in a row.
    pub fn rows(&self, dataset: Dataset) -> Result<BTreeMap<String, Row>, CodecError> {
        let mut rows: BTreeMap<String, Row> = BTreeMap::new();
        for ((ds, row_id, col), register) in &self.cells {
            if *ds != dataset {
                continue;
            }
            if let Some(value) = register.value() {
                rows.entry(row_id.clone())
                    .or_insert_with(|| Row::new(row_id.clone()))
                    .set(col.clone(), value?);
            }
        }
        Ok(rows)
    }
}

impl Lattice for Reduction {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        let mut joined = self.clone();
        for (key, register) in &other.cells {
            joined
                .cells
                .entry(key.clone())
                .or_default()
                .join_assign(register);
        }
        joined
    }
}
