//! Human-readable history of a single record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tkkt_core::{ChangeRecord, CodecError, Row, Value};

const NAME_COLUMN: &str = "name";
const TOMBSTONE_COLUMN: &str = "tombstone";

/// One line of a record's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Timestamp string of the batch's first record.
    pub key: String,
    pub actor: String,
    pub date: DateTime<Utc>,
    pub message: String,
}

/// Narrate the change records of one row, given in causal order.
///
/// Consecutive records sharing a batch id form one entry. The first batch
/// reads "Created <name>"; later batches list what they changed relative to
/// the state before them, and are left out when they changed nothing.
pub fn narrate(records: &[ChangeRecord], generic_name: &str) -> Result<Vec<HistoryEntry>, CodecError> {
    let mut item_name = generic_name.to_string();
    if let Some(record) = records.iter().find(|r| r.col == NAME_COLUMN) {
        if let Value::Text(name) = record.value()? {
            item_name = name;
        }
    }

    let mut entries = Vec::new();
    let mut state = Row::new("");
    for (index, batch) in batches(records).enumerate() {
        let first = &batch[0];
        let previous = state.clone();
        let mut messages = Vec::new();

        for record in batch {
            let value = record.value()?;
            if index > 0 && state.get(&record.col).unwrap_or(&Value::Null) != &value {
                messages.push(describe(&record.col, &value, &previous, generic_name));
            }
            state.set(record.col.clone(), value);
        }

        let message = if index == 0 {
            format!("Created {}", item_name)
        } else if messages.is_empty() {
            continue;
        } else {
            messages.join(", ")
        };

        entries.push(HistoryEntry {
            key: first.hlc.to_string(),
            actor: first.actor.clone(),
            date: first.hlc.date_time(),
            message,
        });
    }
    Ok(entries)
}

fn describe(col: &str, value: &Value, previous: &Row, generic_name: &str) -> String {
    if col == TOMBSTONE_COLUMN {
        let name = match previous.get(NAME_COLUMN) {
            Some(Value::Text(name)) if !name.is_empty() => name.as_str(),
            _ => generic_name,
        };
        return if value.as_bool().unwrap_or(false) {
            format!("Deleted {}", name)
        } else {
            format!("Restored {}", name)
        };
    }
    format!("Changed {} to {}", col, value)
}

/// Split causally ordered records into runs sharing a batch id.
fn batches(records: &[ChangeRecord]) -> impl Iterator<Item = &[ChangeRecord]> + '_ {
    records.chunk_by(|a, b| a.batch_id == b.batch_id)
}
