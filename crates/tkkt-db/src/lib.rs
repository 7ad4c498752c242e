//! # tkkt-db
//!
//! Storage layer of the TKKT local-first store.
//!
//! This crate provides:
//! - The append-only change log (`messages_crdt`) and the per-dataset
//!   materialized views kept in step with it by last-writer-wins
//! - Narrated per-record history and recent-batch feeds
//! - A serialized storage queue in front of SQLite
//! - Digest-driven reconciliation between replicas
//! - Typed operations for events, students, tickets, admins and access logs
//!
//! ## Example
//!
//! ```rust
//! use tkkt_db::{Database, StudentInsert};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tkkt_db::Result<()> {
//! let db = Database::in_memory().await?;
//!
//! db.insert_student(
//!     StudentInsert {
//!         sid: "s1".into(),
//!         event_id: "e1".into(),
//!         name: Some("Ann".into()),
//!     },
//!     "door-admin",
//! )
//! .await?;
//!
//! let student = db.get_student("e1", "s1").await?.unwrap();
//! assert_eq!(student.name.as_deref(), Some("Ann"));
//! # Ok(())
//! # }
//! ```

pub mod changeset;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod history;
pub mod log;
pub mod projection;
pub mod queue;
pub mod schema;
pub mod sync;

pub use changeset::build_change_set;
pub use config::{StoreConfig, StoreConfigBuilder};
pub use database::Database;
pub use domain::{
    student_row_id, Admin, AdminInsert, AdminUpdate, Event, EventUpsert, Student, StudentAccess,
    StudentInsert, StudentUpdate, Ticket, TicketInsert, TicketUpdate,
};
pub use error::{DbError, Result};
pub use history::{narrate, HistoryEntry};
pub use log::{ApplyOutcome, HistoryBatch};
pub use queue::StorageQueue;
pub use sync::{reconcile, SyncPeer, SyncReport, SyncRequest, SyncResponse};
