//! The append-only change log and the atomic apply that keeps the
//! materialized views in step with it.

use crate::error::{DbError, Result};
use crate::projection;
use rusqlite::{params, Connection, OptionalExtension, Params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tkkt_core::{BatchId, ChangeRecord, Dataset, Reduction, Timestamp};
use tracing::{debug, warn};

const RECORD_COLUMNS: &str = "hlc, dataset, rowId, batchId, col, val, actor";

/// Summary of one [`apply`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Records that were new to the log.
    pub appended: usize,
    /// Materialized cells that changed as a result.
    pub projected: usize,
}

impl ApplyOutcome {
    pub fn is_noop(&self) -> bool {
        self.appended == 0
    }
}

/// The records of one batch, in causal order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryBatch {
    pub batch_id: BatchId,
    pub records: Vec<ChangeRecord>,
    /// No earlier batch touched the same row.
    pub is_creation: bool,
}

type RawRecord = (String, String, String, String, String, String, String);

fn raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode_record(raw: RawRecord) -> Result<ChangeRecord> {
    let (hlc, dataset, row_id, batch_id, col, val, actor) = raw;
    Ok(ChangeRecord {
        dataset: dataset.parse()?,
        row_id,
        batch_id: BatchId(batch_id),
        col,
        val,
        hlc: hlc.parse()?,
        actor,
    })
}

fn query_records<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<ChangeRecord>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let raws = stmt
        .query_map(params, raw_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(decode_record).collect()
}

/// Check that every record names a known column and carries a value that
/// column may hold.
pub fn validate(records: &[ChangeRecord]) -> Result<()> {
    for record in records {
        record.dataset.validate(&record.col, &record.value()?)?;
    }
    Ok(())
}

/// Append `records` and project the winners, all in one transaction.
///
/// Records whose `hlc` is already logged are dropped, so applying the same
/// records any number of times, in any order, leaves the same state.
/// Invalid records reject the whole call before storage is touched; a
/// storage failure rolls everything back and surfaces as
/// [`DbError::ApplyFailed`].
pub fn apply(conn: &Connection, records: &[ChangeRecord]) -> Result<ApplyOutcome> {
    validate(records)?;
    if records.is_empty() {
        return Ok(ApplyOutcome::default());
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| DbError::ApplyFailed(format!("begin: {e}")))?;

    match apply_inner(&tx, records) {
        Ok(outcome) => {
            tx.commit()
                .map_err(|e| DbError::ApplyFailed(format!("commit: {e}")))?;
            debug!(
                received = records.len(),
                appended = outcome.appended,
                projected = outcome.projected,
                "applied change records"
            );
            Ok(outcome)
        }
        Err(e) => {
            let _ = tx.rollback();
            warn!(received = records.len(), error = %e, "apply rolled back");
            Err(match e {
                DbError::ApplyFailed(_) => e,
                other => DbError::ApplyFailed(other.to_string()),
            })
        }
    }
}

fn apply_inner(conn: &Connection, records: &[ChangeRecord]) -> Result<ApplyOutcome> {
    let mut appended = HashSet::new();
    let mut touched = BTreeSet::new();

    {
        let mut insert = conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO messages_crdt ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ))?;
        for record in records {
            let hlc = record.hlc.to_string();
            let inserted = insert.execute(params![
                hlc,
                record.dataset.as_str(),
                record.row_id,
                record.batch_id.as_str(),
                record.col,
                record.val,
                record.actor,
            ])?;
            if inserted == 1 {
                touched.insert((record.dataset, record.row_id.as_str(), record.col.as_str()));
                appended.insert(hlc);
            }
        }
    }

    let mut projected = 0;
    let mut winner = conn.prepare_cached(
        "SELECT hlc, val FROM messages_crdt \
         WHERE dataset = ?1 AND rowId = ?2 AND col = ?3 \
         ORDER BY hlc DESC LIMIT 1",
    )?;
    for (dataset, row_id, col) in touched {
        let latest: Option<(String, String)> = winner
            .query_row(params![dataset.as_str(), row_id, col], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        if let Some((hlc, val)) = latest {
            if appended.contains(&hlc) {
                let value = tkkt_core::Value::decode(&val)?;
                projection::upsert_column(conn, dataset, row_id, col, &value)?;
                projected += 1;
            }
        }
    }

    Ok(ApplyOutcome {
        appended: appended.len(),
        projected,
    })
}

/// Every record for one row, ascending by timestamp.
pub fn history(conn: &Connection, dataset: Dataset, row_id: &str) -> Result<Vec<ChangeRecord>> {
    query_records(
        conn,
        &format!(
            "SELECT {RECORD_COLUMNS} FROM messages_crdt \
             WHERE dataset = ?1 AND rowId = ?2 ORDER BY hlc ASC"
        ),
        params![dataset.as_str(), row_id],
    )
}

/// The records of one batch, ascending by timestamp.
pub fn batch(conn: &Connection, batch_id: &BatchId) -> Result<Vec<ChangeRecord>> {
    query_records(
        conn,
        &format!("SELECT {RECORD_COLUMNS} FROM messages_crdt WHERE batchId = ?1 ORDER BY hlc ASC"),
        [batch_id.as_str()],
    )
}

/// The `limit` most recent batches, newest first.
pub fn recent_batches(conn: &Connection, limit: usize) -> Result<Vec<HistoryBatch>> {
    let mut latest = conn.prepare_cached(
        "SELECT batchId, MAX(hlc) AS latest FROM messages_crdt \
         GROUP BY batchId ORDER BY latest DESC LIMIT ?1",
    )?;
    let batch_ids = latest
        .query_map([limit as i64], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut earlier = conn.prepare_cached(
        "SELECT EXISTS (SELECT 1 FROM messages_crdt \
         WHERE dataset = ?1 AND rowId = ?2 AND hlc < ?3 AND batchId <> ?4)",
    )?;

    let mut batches = Vec::with_capacity(batch_ids.len());
    for batch_id in batch_ids.into_iter().map(BatchId) {
        let records = batch(conn, &batch_id)?;

        let rows: BTreeSet<(Dataset, &str)> = records
            .iter()
            .map(|r| (r.dataset, r.row_id.as_str()))
            .collect();
        let mut is_creation = true;
        if let Some(first) = records.first() {
            let first_hlc = first.hlc.to_string();
            for (dataset, row_id) in rows {
                let seen: bool = earlier.query_row(
                    params![dataset.as_str(), row_id, first_hlc, batch_id.as_str()],
                    |row| row.get(0),
                )?;
                if seen {
                    is_creation = false;
                    break;
                }
            }
        }

        batches.push(HistoryBatch {
            batch_id,
            records,
            is_creation,
        });
    }
    Ok(batches)
}

/// Every record with `hlc >= bound`, ascending.
///
/// `bound` is compared as a string, so a [`Timestamp::wall_clock_prefix`]
/// selects everything from that millisecond on.
pub fn records_since(conn: &Connection, bound: &str) -> Result<Vec<ChangeRecord>> {
    query_records(
        conn,
        &format!("SELECT {RECORD_COLUMNS} FROM messages_crdt WHERE hlc >= ?1 ORDER BY hlc ASC"),
        [bound],
    )
}

/// All records, ascending.
pub fn all_records(conn: &Connection) -> Result<Vec<ChangeRecord>> {
    query_records(
        conn,
        &format!("SELECT {RECORD_COLUMNS} FROM messages_crdt ORDER BY hlc ASC"),
        [],
    )
}

/// Every logged timestamp, ascending.
pub fn timestamps(conn: &Connection) -> Result<Vec<Timestamp>> {
    let mut stmt = conn.prepare_cached("SELECT hlc FROM messages_crdt ORDER BY hlc ASC")?;
    let raws = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.iter()
        .map(|raw| raw.parse().map_err(DbError::from))
        .collect()
}

pub fn latest_timestamp(conn: &Connection) -> Result<Option<Timestamp>> {
    let latest: Option<String> =
        conn.query_row("SELECT MAX(hlc) FROM messages_crdt", [], |row| row.get(0))?;
    latest.map(|raw| raw.parse().map_err(DbError::from)).transpose()
}

/// Number of logged records.
pub fn len(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages_crdt", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// Regenerate every materialized view from the log.
pub fn rebuild(conn: &Connection) -> Result<usize> {
    let records = all_records(conn)?;
    let reduction = Reduction::from_records(&records);

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| DbError::ApplyFailed(format!("begin: {e}")))?;
    match projection::rebuild_from(&tx, &reduction) {
        Ok(written) => {
            tx.commit()
                .map_err(|e| DbError::ApplyFailed(format!("commit: {e}")))?;
            Ok(written)
        }
        Err(e) => {
            let _ = tx.rollback();
            warn!(error = %e, "rebuild rolled back");
            Err(DbError::ApplyFailed(e.to_string()))
        }
    }
}
