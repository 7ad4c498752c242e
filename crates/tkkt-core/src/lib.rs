//! # tkkt-core
//!
//! Building blocks of the TKKT local-first store:
//! - [`hlc`]: hybrid logical clock and sortable causal timestamps
//! - [`value`]: scalar values and their tagged one-line encoding
//! - [`dataset`]: static schemas of the replicated tables
//! - [`record`]: column-level change records and rows
//! - [`lattice`], [`lwwreg`], [`reduction`]: the LWW merge every replica
//!   converges on

pub mod dataset;
pub mod hlc;
pub mod lattice;
pub mod lwwreg;
pub mod record;
pub mod reduction;
pub mod value;

pub use dataset::{ColumnSpec, Dataset, SchemaError, KEY_COLUMN};
pub use hlc::{Clock, ClockError, ManualClock, NodeId, SystemClock, Timestamp, WallClock};
pub use lattice::Lattice;
pub use lwwreg::LwwRegister;
pub use record::{BatchId, ChangeRecord, Row};
pub use reduction::Reduction;
pub use value::{CodecError, Value, ValueKind};
