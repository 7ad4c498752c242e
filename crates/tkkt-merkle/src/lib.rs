//! # tkkt-merkle
//!
//! Merkle trie digests for TKKT replicas.
//!
//! A replica summarizes the timestamps of every change record it holds into
//! a [`MerkleDigest`]. Two digests are compared with [`MerkleDigest::diff`],
//! which names the earliest minute where the replicas disagree; syncing
//! everything from that minute on brings them back together.
//!
//! ## Example
//!
//! ```rust
//! use tkkt_core::{NodeId, Timestamp};
//! use tkkt_merkle::MerkleDigest;
//!
//! let node = NodeId::new("replica-a").unwrap();
//! let early = Timestamp::new(1_704_067_200_000, 0, node.clone()).unwrap();
//! let late = Timestamp::new(1_704_067_500_000, 0, node).unwrap();
//!
//! let ours = MerkleDigest::build([&early]);
//! let theirs = MerkleDigest::build([&early, &late]);
//!
//! let minute = ours.diff(&theirs).unwrap().unwrap();
//! assert_eq!(minute.timestamp_millis(), 1_704_067_500_000);
//! ```

mod digest;
mod hash;

pub use digest::{key_string, key_to_time, minute_key, DigestError, MerkleDigest, KEY_WIDTH};
pub use hash::Hash;
