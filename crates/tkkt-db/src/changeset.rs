//! Translating a row mutation into column-level change records.

use crate::error::{DbError, Result};
use tkkt_core::{BatchId, ChangeRecord, Clock, Dataset, Row, KEY_COLUMN};

/// One change record per non-key column of `row`, sharing a fresh batch id.
///
/// Columns are emitted in byte order of their names and each gets its own
/// freshly ticked timestamp, so the records of a batch are causally ordered
/// the same way on every replica. Every column is checked against the
/// dataset schema before the clock is touched.
pub fn build_change_set(
    dataset: Dataset,
    row: &Row,
    clock: &mut Clock,
    actor: &str,
) -> Result<Vec<ChangeRecord>> {
    let mut encoded = Vec::with_capacity(row.len());
    for (column, value) in row.columns() {
        if column == KEY_COLUMN {
            continue;
        }
        dataset.validate(column, value)?;
        encoded.push((column, value.encode()?));
    }

    let batch_id = BatchId::new();
    encoded
        .into_iter()
        .map(|(column, val)| {
            Ok::<_, DbError>(ChangeRecord {
                dataset,
                row_id: row.id().to_string(),
                batch_id: batch_id.clone(),
                col: column.to_string(),
                val,
                hlc: clock.tick()?,
                actor: actor.to_string(),
            })
        })
        .collect()
}
