//! The async store facade.

use crate::changeset::build_change_set;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::history::{narrate, HistoryEntry};
use crate::log::{self, ApplyOutcome, HistoryBatch};
use crate::projection;
use crate::queue::StorageQueue;
use parking_lot::Mutex;
use std::sync::Arc;
use tkkt_core::{ChangeRecord, Clock, Dataset, NodeId, Row, SystemClock, Timestamp, WallClock};
use tkkt_merkle::MerkleDigest;
use tracing::{debug, info};

/// A local replica: the change log, its materialized views and the causal
/// clock that stamps local edits.
///
/// Cloning is cheap and every clone talks to the same storage queue.
#[derive(Clone)]
pub struct Database {
    queue: StorageQueue,
    clock: Arc<Mutex<Clock>>,
    node_id: NodeId,
    max_sync_rounds: usize,
}

impl Database {
    /// Open a replica driven by the system clock.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_wall_clock(config, Arc::new(SystemClock)).await
    }

    /// Open an in-memory replica with a fresh node id.
    pub async fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::in_memory()).await
    }

    /// Open a replica whose clock reads from `wall`.
    ///
    /// The clock first observes the newest logged timestamp, so a reopened
    /// replica never stamps a record older than one it already holds.
    pub async fn open_with_wall_clock(config: StoreConfig, wall: Arc<dyn WallClock>) -> Result<Self> {
        let node_id = config.node_id.clone().unwrap_or_else(NodeId::random);
        let queue = StorageQueue::open(&config)?;

        let mut clock = Clock::with_source(node_id.clone(), wall);
        let latest = queue.execute(|conn| log::latest_timestamp(conn)).await?;
        if let Some(latest) = &latest {
            clock.observe(latest)?;
        }

        info!(
            node = %node_id,
            path = ?config.path,
            latest = ?latest.as_ref().map(|t| t.to_string()),
            "replica opened"
        );
        Ok(Self {
            queue,
            clock: Arc::new(Mutex::new(clock)),
            node_id,
            max_sync_rounds: config.max_sync_rounds,
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn max_sync_rounds(&self) -> usize {
        self.max_sync_rounds
    }

    /// The clock's last issued or observed timestamp.
    pub fn clock(&self) -> Timestamp {
        self.clock.lock().current()
    }

    /// Advance the clock for a local event.
    pub fn tick(&self) -> Result<Timestamp> {
        Ok(self.clock.lock().tick()?)
    }

    /// Merge a remote timestamp into the clock.
    pub fn observe(&self, remote: &Timestamp) -> Result<()> {
        Ok(self.clock.lock().observe(remote)?)
    }

    /// Apply change records from any source.
    pub async fn apply(&self, records: Vec<ChangeRecord>) -> Result<ApplyOutcome> {
        self.queue.execute(move |conn| log::apply(conn, &records)).await
    }

    /// Stamp every column of `row` and apply the resulting change set.
    pub async fn insert(&self, dataset: Dataset, row: Row, actor: &str) -> Result<Vec<ChangeRecord>> {
        let clock = self.clock.clone();
        let actor = actor.to_string();
        self.queue
            .execute(move |conn| {
                let records = build_change_set(dataset, &row, &mut clock.lock(), &actor)?;
                log::apply(conn, &records)?;
                Ok(records)
            })
            .await
    }

    /// Write only the columns of `row` that differ from the stored row.
    ///
    /// Returns `false` without touching the log when nothing changed. A row
    /// that does not exist yet is written in full.
    pub async fn write(&self, dataset: Dataset, row: Row, actor: &str) -> Result<bool> {
        let clock = self.clock.clone();
        let actor = actor.to_string();
        self.queue
            .execute(move |conn| {
                let changes = match projection::read_row(conn, dataset, row.id())? {
                    Some(existing) => row.changes_from(&existing),
                    None => row,
                };
                if changes.is_empty() {
                    debug!(%dataset, row = changes.id(), "write skipped, nothing changed");
                    return Ok(false);
                }
                let records = build_change_set(dataset, &changes, &mut clock.lock(), &actor)?;
                log::apply(conn, &records)?;
                Ok(true)
            })
            .await
    }

    /// Every change record of one row, ascending.
    pub async fn history(&self, dataset: Dataset, row_id: &str) -> Result<Vec<ChangeRecord>> {
        let row_id = row_id.to_string();
        self.queue
            .execute(move |conn| log::history(conn, dataset, &row_id))
            .await
    }

    /// The narrated history of one row.
    pub async fn history_entries(&self, dataset: Dataset, row_id: &str) -> Result<Vec<HistoryEntry>> {
        let records = self.history(dataset, row_id).await?;
        Ok(narrate(&records, dataset.generic_name())?)
    }

    pub async fn recent_batches(&self, limit: usize) -> Result<Vec<HistoryBatch>> {
        self.queue
            .execute(move |conn| log::recent_batches(conn, limit))
            .await
    }

    /// Records with `hlc >= bound`, ascending.
    pub async fn records_since(&self, bound: &str) -> Result<Vec<ChangeRecord>> {
        let bound = bound.to_string();
        self.queue
            .execute(move |conn| log::records_since(conn, &bound))
            .await
    }

    pub async fn timestamps(&self) -> Result<Vec<Timestamp>> {
        self.queue.execute(|conn| log::timestamps(conn)).await
    }

    pub async fn latest_timestamp(&self) -> Result<Option<Timestamp>> {
        self.queue.execute(|conn| log::latest_timestamp(conn)).await
    }

    /// Number of records in the log.
    pub async fn len(&self) -> Result<usize> {
        self.queue.execute(|conn| log::len(conn)).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn get(&self, dataset: Dataset, id: &str) -> Result<Option<Row>> {
        let id = id.to_string();
        self.queue
            .execute(move |conn| projection::read_row(conn, dataset, &id))
            .await
    }

    pub async fn list(&self, dataset: Dataset) -> Result<Vec<Row>> {
        self.queue
            .execute(move |conn| projection::read_rows(conn, dataset))
            .await
    }

    /// Regenerate every materialized view from the log.
    pub async fn rebuild(&self) -> Result<usize> {
        self.queue.execute(|conn| log::rebuild(conn)).await
    }

    /// Merkle digest of every logged timestamp.
    pub async fn digest(&self) -> Result<MerkleDigest> {
        let timestamps = self.timestamps().await?;
        Ok(MerkleDigest::build(&timestamps))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("node_id", &self.node_id)
            .field("clock", &self.clock())
            .finish()
    }
}
