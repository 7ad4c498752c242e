//! Merkle trie over minute buckets.
//!
//! Every timestamp is hashed and folded into a trie keyed by the base-3
//! digits of its minute epoch (`wall_clock_ms / 60_000`). Each node stores
//! the XOR of all hashes beneath it, so two replicas can compare histories
//! one level at a time and find the earliest minute where they disagree.
//!
//! Nodes live in an arena (`Vec`) and reference children by index; node 0
//! is the root. All traversals are iterative.

use crate::hash::Hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use thiserror::Error;
use tkkt_core::Timestamp;

/// Number of base-3 digits in a key; covers minute epochs through 2215.
pub const KEY_WIDTH: usize = 17;

const MINUTE_MS: u64 = 60_000;
const MAX_MINUTE: u64 = 3u64.pow(KEY_WIDTH as u32) - 1;

/// Errors for digests received from elsewhere.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TrieNode {
    hash: Hash,
    /// Base-3 digit -> arena index.
    children: BTreeMap<u8, usize>,
}

/// A Merkle trie summarizing a set of timestamps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleDigest {
    nodes: Vec<TrieNode>,
}

impl Default for MerkleDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleDigest {
    /// An empty digest (root only, zero hash).
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
        }
    }

    /// Build a digest from a replica's timestamps.
    pub fn build<'a>(timestamps: impl IntoIterator<Item = &'a Timestamp>) -> Self {
        let mut digest = Self::new();
        for timestamp in timestamps {
            digest.insert(timestamp);
        }
        digest
    }

    /// Fold one timestamp into the trie.
    pub fn insert(&mut self, timestamp: &Timestamp) {
        let hash = Hash::of_timestamp(timestamp);
        let mut current = 0;
        self.nodes[current].hash ^= hash;

        for digit in minute_key(timestamp.wall_clock_ms()) {
            let next = match self.nodes[current].children.get(&digit) {
                Some(&index) => index,
                None => {
                    let index = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[current].children.insert(digit, index);
                    index
                }
            };
            self.nodes[next].hash ^= hash;
            current = next;
        }
    }

    /// XOR of every timestamp hash in the digest.
    pub fn root_hash(&self) -> Hash {
        self.nodes.first().map(|n| n.hash).unwrap_or_default()
    }

    /// Number of trie nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1 && self.root_hash().is_zero()
    }

    /// Check the structure of a digest that did not come from [`build`].
    ///
    /// [`build`]: MerkleDigest::build
    pub fn validate(&self) -> Result<(), DigestError> {
        let invalid = |reason: String| Err(DigestError::InvalidDigest(reason));

        if self.nodes.is_empty() {
            return invalid("missing root node".into());
        }

        let mut seen = HashSet::from([0usize]);
        let mut queue = VecDeque::from([(0usize, 0usize)]);
        while let Some((index, depth)) = queue.pop_front() {
            let node = &self.nodes[index];

            if node.children.is_empty() {
                if depth != KEY_WIDTH && !(index == 0 && node.hash.is_zero()) {
                    return invalid(format!("leaf {} at depth {}", index, depth));
                }
                continue;
            }
            if depth >= KEY_WIDTH {
                return invalid(format!("node {} deeper than key width", index));
            }

            let mut folded = Hash::zero();
            for (&digit, &child) in &node.children {
                if digit > 2 {
                    return invalid(format!("digit {} is not base 3", digit));
                }
                if child >= self.nodes.len() {
                    return invalid(format!("dangling child index {}", child));
                }
                if !seen.insert(child) {
                    return invalid(format!("node {} is shared or cyclic", child));
                }
                folded ^= self.nodes[child].hash;
                queue.push_back((child, depth + 1));
            }
            if folded != node.hash {
                return invalid(format!("hash of node {} does not match its children", index));
            }
        }

        if seen.len() != self.nodes.len() {
            return invalid(format!("{} unreachable nodes", self.nodes.len() - seen.len()));
        }
        Ok(())
    }

    /// Find the earliest minute at which `self` and `other` diverge.
    ///
    /// Returns `None` when both digests hold the same set of timestamps.
    /// Differences inside one minute are not distinguishable; the caller is
    /// expected to re-exchange everything from the returned minute on.
    pub fn diff(&self, other: &MerkleDigest) -> Result<Option<DateTime<Utc>>, DigestError> {
        self.validate()?;
        other.validate()?;

        if self.root_hash() == other.root_hash() {
            return Ok(None);
        }

        let mut path = Vec::with_capacity(KEY_WIDTH);
        let (mut a, mut b) = (Some(0usize), Some(0usize));
        loop {
            let keys: BTreeSet<u8> = self
                .children_of(a)
                .chain(other.children_of(b))
                .collect();

            let differing = keys.into_iter().find(|digit| {
                self.hash_of(self.child(a, *digit)) != other.hash_of(other.child(b, *digit))
            });

            match differing {
                Some(digit) => {
                    path.push(digit);
                    a = self.child(a, digit);
                    b = other.child(b, digit);
                }
                None => break,
            }
        }

        Ok(Some(key_to_time(&path)))
    }

    fn children_of(&self, node: Option<usize>) -> impl Iterator<Item = u8> + '_ {
        node.into_iter()
            .flat_map(move |index| self.nodes[index].children.keys().copied())
    }

    fn child(&self, node: Option<usize>, digit: u8) -> Option<usize> {
        node.and_then(|index| self.nodes[index].children.get(&digit).copied())
    }

    fn hash_of(&self, node: Option<usize>) -> Hash {
        node.map(|index| self.nodes[index].hash).unwrap_or_default()
    }
}

/// Base-3 digits of the minute containing `wall_clock_ms`, most significant
/// first, zero-padded to [`KEY_WIDTH`].
pub fn minute_key(wall_clock_ms: u64) -> [u8; KEY_WIDTH] {
    let mut minutes = (wall_clock_ms / MINUTE_MS).min(MAX_MINUTE);
    let mut key = [0u8; KEY_WIDTH];
    for slot in key.iter_mut().rev() {
        *slot = (minutes % 3) as u8;
        minutes /= 3;
    }
    key
}

/// Render a key path as its base-3 string.
pub fn key_string(key: &[u8]) -> String {
    key.iter().map(|d| char::from(b'0' + d)).collect()
}

/// The start of the minute bucket named by a (possibly partial) key path.
///
/// Missing trailing digits are taken as `0`.
pub fn key_to_time(path: &[u8]) -> DateTime<Utc> {
    let minutes = (0..KEY_WIDTH).fold(0u64, |acc, i| acc * 3 + u64::from(*path.get(i).unwrap_or(&0)));
    DateTime::from_timestamp_millis((minutes * MINUTE_MS) as i64).unwrap_or_default()
}
