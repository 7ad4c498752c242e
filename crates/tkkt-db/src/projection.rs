//! Materialized views: one SQLite table per dataset holding the LWW state
//! of every row.

use crate::error::{DbError, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use tkkt_core::{ColumnSpec, Dataset, Reduction, Row, Value, ValueKind, KEY_COLUMN};
use tracing::debug;

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Number(n) => SqlValue::Real(*n),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
    }
}

/// NUMERIC affinity stores integral numbers as integers, and booleans are
/// stored as 0/1, so the column kind decides how a stored value reads back.
fn from_sql(spec: &ColumnSpec, stored: SqlValue) -> Result<Value> {
    let value = match (spec.kind, stored) {
        (_, SqlValue::Null) => Value::Null,
        (ValueKind::Number, SqlValue::Integer(i)) => Value::Number(i as f64),
        (ValueKind::Number, SqlValue::Real(f)) => Value::Number(f),
        (ValueKind::Boolean, SqlValue::Integer(i)) => Value::Boolean(i != 0),
        (ValueKind::Boolean, SqlValue::Real(f)) => Value::Boolean(f != 0.0),
        (ValueKind::Text, SqlValue::Text(s)) => Value::Text(s),
        (ValueKind::Text, SqlValue::Integer(i)) => Value::Text(i.to_string()),
        (ValueKind::Text, SqlValue::Real(f)) => Value::Text(f.to_string()),
        (kind, other) => {
            return Err(DbError::Storage(format!(
                "column {:?} holds {:?}, expected {}",
                spec.name,
                other.data_type(),
                kind
            )))
        }
    };
    Ok(value)
}

fn select_sql(dataset: Dataset) -> String {
    let mut columns = vec![format!("\"{}\"", KEY_COLUMN)];
    columns.extend(dataset.columns().iter().map(|c| format!("\"{}\"", c.name)));
    format!("SELECT {} FROM \"{}\"", columns.join(", "), dataset.as_str())
}

fn decode_row(dataset: Dataset, raw: Vec<SqlValue>) -> Result<Row> {
    let mut values = raw.into_iter();
    let id = match values.next() {
        Some(SqlValue::Text(id)) => id,
        other => return Err(DbError::Storage(format!("bad row id {:?}", other))),
    };
    let mut row = Row::new(id);
    for (spec, stored) in dataset.columns().iter().zip(values) {
        row.set(spec.name, from_sql(spec, stored)?);
    }
    Ok(row)
}

fn raw_row(dataset: Dataset) -> impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<Vec<SqlValue>> {
    let width = dataset.columns().len() + 1;
    move |row: &rusqlite::Row<'_>| (0..width).map(|i| row.get::<_, SqlValue>(i)).collect()
}

/// Write one column of one materialized row, creating the row if needed.
///
/// Column names come from the static schema, never from the caller.
pub fn upsert_column(
    conn: &Connection,
    dataset: Dataset,
    row_id: &str,
    column: &str,
    value: &Value,
) -> Result<()> {
    let spec = dataset.validate(column, value)?;
    let sql = format!(
        "INSERT INTO \"{table}\" (\"{key}\", \"{col}\") VALUES (?1, ?2) \
         ON CONFLICT(\"{key}\") DO UPDATE SET \"{col}\" = excluded.\"{col}\"",
        table = dataset.as_str(),
        key = KEY_COLUMN,
        col = spec.name,
    );
    conn.prepare_cached(&sql)?
        .execute(params![row_id, to_sql(value)])?;
    Ok(())
}

/// The materialized row `id`, with every declared column present.
pub fn read_row(conn: &Connection, dataset: Dataset, id: &str) -> Result<Option<Row>> {
    let sql = format!("{} WHERE \"{}\" = ?1", select_sql(dataset), KEY_COLUMN);
    let raw = conn
        .prepare_cached(&sql)?
        .query_row([id], raw_row(dataset))
        .optional()?;
    raw.map(|raw| decode_row(dataset, raw)).transpose()
}

/// Every materialized row of a dataset, ordered by id.
pub fn read_rows(conn: &Connection, dataset: Dataset) -> Result<Vec<Row>> {
    let sql = format!("{} ORDER BY \"{}\"", select_sql(dataset), KEY_COLUMN);
    let mut stmt = conn.prepare_cached(&sql)?;
    let raws = stmt
        .query_map([], raw_row(dataset))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(|raw| decode_row(dataset, raw)).collect()
}

/// Replace every materialized table with the reduction of `reduction`.
///
/// Runs on the caller's connection; the caller owns the transaction.
pub fn rebuild_from(conn: &Connection, reduction: &Reduction) -> Result<usize> {
    let mut written = 0;
    for dataset in Dataset::ALL {
        conn.execute(&format!("DELETE FROM \"{}\"", dataset.as_str()), [])?;
        for (row_id, row) in reduction.rows(dataset)? {
            for (column, value) in row.columns() {
                upsert_column(conn, dataset, &row_id, column, value)?;
                written += 1;
            }
        }
    }
    debug!(cells = written, "materialized views rebuilt");
    Ok(written)
}
