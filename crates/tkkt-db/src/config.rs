//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;
use tkkt_core::NodeId;

/// Configuration for a [`Database`](crate::Database).
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// SQLite file; `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Replica id stamped into every timestamp; `None` generates one.
    pub node_id: Option<NodeId>,
    /// Jobs that may wait on the storage queue before submitters block.
    pub queue_capacity: usize,
    pub busy_timeout: Duration,
    /// Upper bound on digest exchanges in one reconciliation.
    pub max_sync_rounds: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            node_id: None,
            queue_capacity: 256,
            busy_timeout: Duration::from_secs(5),
            max_sync_rounds: 8,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::new()
    }
}

/// Builder for store configuration.
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = Some(path.into());
        self
    }

    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.config.node_id = Some(node_id);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity.max(1);
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.config.busy_timeout = timeout;
        self
    }

    pub fn max_sync_rounds(mut self, rounds: usize) -> Self {
        self.config.max_sync_rounds = rounds.max(1);
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
