//! Serialized access to the SQLite connection.
//!
//! One storage thread owns the connection and runs submitted jobs strictly
//! in submission order. Async callers enqueue a job and await its result,
//! so no two storage operations ever interleave.

use crate::config::StoreConfig;
use crate::error::{DbError, Result};
use crate::schema;
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

/// Handle to the storage thread. Cloning shares the same queue; the
/// thread exits once every handle is dropped.
#[derive(Clone, Debug)]
pub struct StorageQueue {
    sender: mpsc::Sender<Job>,
}

impl StorageQueue {
    /// Open the configured database, bootstrap its schema and start the
    /// storage thread.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(config.busy_timeout)?;
        schema::migrate(&conn)?;
        Self::start(conn, config.queue_capacity)
    }

    /// Start the storage thread on an already prepared connection.
    pub fn start(mut conn: Connection, capacity: usize) -> Result<Self> {
        let (sender, mut receiver) = mpsc::channel::<Job>(capacity.max(1));
        std::thread::Builder::new()
            .name("tkkt-storage".into())
            .spawn(move || {
                let mut executed: u64 = 0;
                while let Some(job) = receiver.blocking_recv() {
                    job(&mut conn);
                    executed += 1;
                }
                debug!(executed, "storage queue drained");
            })
            .map_err(|e| DbError::Storage(format!("spawn storage thread: {e}")))?;
        Ok(Self { sender })
    }

    /// Run `f` on the storage thread once every earlier job has finished.
    pub async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            let _ = reply.send(f(conn));
        });

        trace!(pending = self.pending(), "enqueue storage job");
        self.sender
            .send(job)
            .await
            .map_err(|_| DbError::QueueClosed)?;
        response.await.map_err(|_| DbError::QueueClosed)?
    }

    /// Jobs waiting behind the one currently running.
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}
