//! Last-Write-Wins (LWW) register over causal timestamps.
//!
//! One register per `(dataset, row, column)` cell. The register keeps the
//! encoded value carried by the change record with the greatest timestamp;
//! because timestamps are unique per record, the winner never depends on the
//! order in which records arrive.

use crate::hlc::Timestamp;
use crate::lattice::Lattice;
use crate::record::ChangeRecord;
use crate::value::{CodecError, Value};
use serde::{Deserialize, Serialize};

/// A Last-Write-Wins register holding an encoded value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister {
    /// The winning timestamp and its encoded value, if any write was seen.
    entry: Option<(Timestamp, String)>,
}

impl LwwRegister {
    pub fn new() -> Self {
        Self { entry: None }
    }

    /// Offer a write; returns true if it became the current value.
    pub fn set(&mut self, hlc: Timestamp, encoded: String) -> bool {
        let wins = match &self.entry {
            None => true,
            Some((current, current_val)) => {
                hlc > *current || (hlc == *current && encoded > *current_val)
            }
        };
        if wins {
            self.entry = Some((hlc, encoded));
        }
        wins
    }

    /// Offer the write carried by a change record.
    pub fn absorb(&mut self, record: &ChangeRecord) -> bool {
        self.set(record.hlc.clone(), record.val.clone())
    }

    /// The encoded winning value.
    pub fn encoded(&self) -> Option<&str> {
        self.entry.as_ref().map(|(_, val)| val.as_str())
    }

    /// The decoded winning value.
    pub fn value(&self) -> Option<Result<Value, CodecError>> {
        self.encoded().map(Value::decode)
    }

    /// The timestamp of the winning write.
    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.entry.as_ref().map(|(hlc, _)| hlc)
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }
}

impl Lattice for LwwRegister {
    fn bottom() -> Self {
        Self::new()
    }

    /// Keep the entry with the greatest timestamp; identical timestamps fall
    /// back to the encoded value so the join stays deterministic.
    fn join(&self, other: &Self) -> Self {
        let mut joined = self.clone();
        if let Some((hlc, val)) = &other.entry {
            joined.set(hlc.clone(), val.clone());
        }
        joined
    }
}
