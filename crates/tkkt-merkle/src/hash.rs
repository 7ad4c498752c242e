//! Content hashes folded into digest nodes.
//!
//! Uses SHA-256 over a timestamp's canonical string. Hashes combine with
//! XOR, so a node's hash does not depend on insertion order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::{BitXor, BitXorAssign};
use tkkt_core::Timestamp;

/// A 32-byte SHA-256 hash.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// SHA-256 of arbitrary bytes.
    pub fn of(data: &[u8]) -> Self {
        Hash(Sha256::digest(data).into())
    }

    /// Hash of a timestamp's canonical string form.
    pub fn of_timestamp(timestamp: &Timestamp) -> Self {
        Self::of(timestamp.to_string().as_bytes())
    }

    /// The XOR identity; hash of an empty subtree.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 8 hex chars, for logs.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl BitXor for Hash {
    type Output = Hash;

    fn bitxor(mut self, rhs: Hash) -> Hash {
        self ^= rhs;
        self
    }
}

impl BitXorAssign for Hash {
    fn bitxor_assign(&mut self, rhs: Hash) {
        for (byte, other) in self.0.iter_mut().zip(rhs.0) {
            *byte ^= other;
        }
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}..)", self.short())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
