//! Schema bootstrap: connection pragmas, the change log and one
//! materialized table per dataset.

use crate::error::Result;
use rusqlite::Connection;
use tkkt_core::{Dataset, KEY_COLUMN};
use tracing::debug;

/// Name of the append-only change log table.
pub const LOG_TABLE: &str = "messages_crdt";

const LOG_DDL: &str = "
    CREATE TABLE IF NOT EXISTS messages_crdt (
        hlc TEXT PRIMARY KEY NOT NULL,
        dataset TEXT NOT NULL,
        rowId TEXT NOT NULL,
        batchId TEXT NOT NULL,
        col TEXT NOT NULL,
        val TEXT NOT NULL,
        actor TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS messages_crdt_cell
        ON messages_crdt (dataset, rowId, col);
    CREATE INDEX IF NOT EXISTS messages_crdt_batch
        ON messages_crdt (batchId);
";

/// Apply per-connection pragmas.
pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

/// `CREATE TABLE` statement for a dataset's materialized view.
pub fn table_ddl(dataset: Dataset) -> String {
    let mut columns = vec![format!("\"{}\" TEXT PRIMARY KEY NOT NULL", KEY_COLUMN)];
    columns.extend(dataset.columns().iter().map(|c| c.sql_definition()));
    format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
        dataset.as_str(),
        columns.join(", ")
    )
}

/// Idempotently create every table and index.
pub fn migrate(conn: &Connection) -> Result<()> {
    apply_pragmas(conn)?;
    conn.execute_batch(LOG_DDL)?;
    for dataset in Dataset::ALL {
        conn.execute_batch(&table_ddl(dataset))?;
    }
    debug!(datasets = Dataset::ALL.len(), "schema ready");
    Ok(())
}
