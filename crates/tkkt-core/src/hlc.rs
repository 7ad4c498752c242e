//! Hybrid Logical Clock (HLC)
//!
//! A causal timestamp combines the wall clock, a tie-breaking counter and the
//! id of the node that produced it. Timestamps are totally ordered by
//! `(wall_clock_ms, counter, node_id)` and serialize to a fixed-width string
//!
//! ```text
//! 2024-01-01T00:00:00.001Z 0000000005 01HNZ8Q6W1V4J3G7ZC1T3S9R2A
//! ```
//!
//! so that plain string comparison (and therefore SQL `ORDER BY` / `MAX`)
//! reproduces timestamp order.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use ulid::Ulid;

const WALL_CLOCK_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const WALL_CLOCK_WIDTH: usize = 24;
const COUNTER_WIDTH: usize = 10;

/// Largest representable wall clock: `9999-12-31T23:59:59.999Z`.
pub const MAX_WALL_CLOCK_MS: u64 = 253_402_300_799_999;

/// Errors produced by the causal clock.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("Malformed timestamp: {0:?}")]
    MalformedTimestamp(String),

    #[error("Invalid node id: {0:?}")]
    InvalidNodeId(String),

    #[error("Wall clock out of range: {0}ms")]
    WallClockOutOfRange(u64),
}

/// Identifier of the replica that generated a timestamp.
///
/// Must be non-empty and free of whitespace, since the serialized timestamp
/// uses spaces as separators.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Result<Self, ClockError> {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(ClockError::InvalidNodeId(id));
        }
        Ok(Self(id))
    }

    /// A fresh, globally unique node id.
    pub fn random() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeId {
    type Error = ClockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NodeId::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A causal timestamp.
///
/// The derived ordering compares fields in declaration order, which is the
/// HLC total order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    wall_clock_ms: u64,
    counter: u32,
    node_id: NodeId,
}

impl Timestamp {
    pub fn new(wall_clock_ms: u64, counter: u32, node_id: NodeId) -> Result<Self, ClockError> {
        if wall_clock_ms > MAX_WALL_CLOCK_MS {
            return Err(ClockError::WallClockOutOfRange(wall_clock_ms));
        }
        Ok(Self {
            wall_clock_ms,
            counter,
            node_id,
        })
    }

    pub fn wall_clock_ms(&self) -> u64 {
        self.wall_clock_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The wall clock as a UTC date-time.
    pub fn date_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.wall_clock_ms as i64).unwrap_or_default()
    }

    /// The serialized wall-clock component for `wall_clock_ms`.
    ///
    /// It is a strict prefix of every timestamp serialized within that
    /// millisecond, so `hlc >= prefix` selects everything from that
    /// millisecond onwards.
    pub fn wall_clock_prefix(wall_clock_ms: u64) -> String {
        let ms = wall_clock_ms.min(MAX_WALL_CLOCK_MS) as i64;
        DateTime::from_timestamp_millis(ms)
            .unwrap_or_default()
            .format(WALL_CLOCK_FORMAT)
            .to_string()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:0width$} {}",
            Self::wall_clock_prefix(self.wall_clock_ms),
            self.counter,
            self.node_id,
            width = COUNTER_WIDTH
        )
    }
}

impl FromStr for Timestamp {
    type Err = ClockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ClockError::MalformedTimestamp(s.to_string());

        let mut parts = s.split(' ');
        let (wall, counter, node) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(wall), Some(counter), Some(node), None) => (wall, counter, node),
            _ => return Err(malformed()),
        };

        if wall.len() != WALL_CLOCK_WIDTH {
            return Err(malformed());
        }
        let wall_clock_ms = NaiveDateTime::parse_from_str(wall, WALL_CLOCK_FORMAT)
            .map_err(|_| malformed())?
            .and_utc()
            .timestamp_millis();
        let wall_clock_ms = u64::try_from(wall_clock_ms).map_err(|_| malformed())?;

        if counter.len() != COUNTER_WIDTH || !counter.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let counter: u32 = counter.parse().map_err(|_| malformed())?;

        let node_id = NodeId::new(node).map_err(|_| malformed())?;
        let timestamp = Timestamp::new(wall_clock_ms, counter, node_id).map_err(|_| malformed())?;

        // Only the canonical spelling keeps string order equal to timestamp order.
        if timestamp.to_string() != s {
            return Err(malformed());
        }
        Ok(timestamp)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Source of physical time for a [`Clock`].
pub trait WallClock: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The operating system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// A wall clock that only moves when told to. Used for deterministic tests
/// and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// The local causal clock of one replica.
///
/// Owned explicitly and threaded through the code that stamps changes; it is
/// advanced by [`Clock::tick`] for local events and by [`Clock::observe`] for
/// timestamps learned from other replicas.
#[derive(Clone, Debug)]
pub struct Clock {
    wall_clock_ms: u64,
    counter: u32,
    node_id: NodeId,
    source: Arc<dyn WallClock>,
}

impl Clock {
    /// Create a clock driven by the system wall clock.
    pub fn new(node_id: NodeId) -> Self {
        Self::with_source(node_id, Arc::new(SystemClock))
    }

    /// Create a clock driven by an arbitrary wall-clock source.
    pub fn with_source(node_id: NodeId, source: Arc<dyn WallClock>) -> Self {
        Self {
            wall_clock_ms: 0,
            counter: 0,
            node_id,
            source,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The last state of the clock, without advancing it.
    pub fn current(&self) -> Timestamp {
        Timestamp {
            wall_clock_ms: self.wall_clock_ms,
            counter: self.counter,
            node_id: self.node_id.clone(),
        }
    }

    /// Advance the clock for a local event and return the new timestamp.
    ///
    /// Fails only when the counter is exhausted at the last representable
    /// millisecond; the clock is left unchanged.
    pub fn tick(&mut self) -> Result<Timestamp, ClockError> {
        let now = self.now();
        if now > self.wall_clock_ms {
            self.wall_clock_ms = now;
            self.counter = 0;
        } else {
            self.step(self.wall_clock_ms, self.counter)?;
        }
        Ok(self.current())
    }

    /// Merge a timestamp received from another replica into the local state.
    ///
    /// The local node id is kept.
    pub fn observe(&mut self, remote: &Timestamp) -> Result<(), ClockError> {
        let now = self.now();
        if now > self.wall_clock_ms && now > remote.wall_clock_ms {
            self.wall_clock_ms = now;
            self.counter = 0;
            Ok(())
        } else if self.wall_clock_ms == remote.wall_clock_ms {
            self.step(self.wall_clock_ms, self.counter.max(remote.counter))
        } else if self.wall_clock_ms > remote.wall_clock_ms {
            self.step(self.wall_clock_ms, self.counter)
        } else {
            self.step(remote.wall_clock_ms, remote.counter)
        }
    }

    fn now(&self) -> u64 {
        self.source.now_ms().min(MAX_WALL_CLOCK_MS)
    }

    /// Move to `(wall_clock_ms, counter + 1)`; an exhausted counter spills
    /// into the next millisecond.
    fn step(&mut self, wall_clock_ms: u64, counter: u32) -> Result<(), ClockError> {
        match counter.checked_add(1) {
            Some(next) => {
                self.wall_clock_ms = wall_clock_ms;
                self.counter = next;
            }
            None if wall_clock_ms < MAX_WALL_CLOCK_MS => {
                self.wall_clock_ms = wall_clock_ms + 1;
                self.counter = 0;
            }
            None => return Err(ClockError::WallClockOutOfRange(wall_clock_ms)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAN_1_2024: u64 = 1_704_067_200_000;

    fn node(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn manual_clock(id: &str, now_ms: u64) -> (Clock, Arc<ManualClock>) {
        let source = Arc::new(ManualClock::new(now_ms));
        (Clock::with_source(node(id), source.clone()), source)
    }

    #[test]
    fn test_timestamp_format() {
        let ts = Timestamp::new(JAN_1_2024 + 1, 5, node("node-a")).unwrap();
        assert_eq!(ts.to_string(), "2024-01-01T00:00:00.001Z 0000000005 node-a");
    }

    #[test]
    fn test_timestamp_parse_roundtrip() {
        let ts = Timestamp::new(JAN_1_2024 + 61_002, u32::MAX, node("n1")).unwrap();
        let parsed: Timestamp = ts.to_string().parse().unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn test_timestamp_parse_rejects_malformed() {
        for input in [
            "",
            "garbage",
            "2024-01-01T00:00:00.001Z 5 node",
            "2024-01-01T00:00:00Z 0000000005 node",
            "2024-01-01T00:00:00.001Z 0000000005",
            "2024-01-01T00:00:00.001Z 0000000005 node extra",
            "2024-13-01T00:00:00.001Z 0000000005 node",
            "2024-01-01T00:00:00.001Z 9999999999 node",
            "2024-01-01T00:00:00.001+00:00 0000000005 node",
        ] {
            assert!(
                matches!(input.parse::<Timestamp>(), Err(ClockError::MalformedTimestamp(_))),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_string_order_matches_timestamp_order() {
        let a = Timestamp::new(JAN_1_2024, 9, node("a")).unwrap();
        let b = Timestamp::new(JAN_1_2024, 10, node("a")).unwrap();
        let c = Timestamp::new(JAN_1_2024 + 1, 0, node("a")).unwrap();
        let d = Timestamp::new(JAN_1_2024 + 1, 0, node("b")).unwrap();

        assert!(a < b && b < c && c < d);
        assert!(a.to_string() < b.to_string());
        assert!(b.to_string() < c.to_string());
        assert!(c.to_string() < d.to_string());
    }

    #[test]
    fn test_node_id_validation() {
        assert!(NodeId::new("").is_err());
        assert!(NodeId::new("has space").is_err());
        assert!(NodeId::new("tab\there").is_err());
        assert!(NodeId::new("ok-node_1").is_ok());
        assert_eq!(NodeId::random().as_str().len(), 26);
    }

    #[test]
    fn test_tick_uses_wall_clock_when_it_advances() {
        let (mut clock, source) = manual_clock("a", JAN_1_2024);
        let first = clock.tick().unwrap();
        assert_eq!(first.wall_clock_ms(), JAN_1_2024);
        assert_eq!(first.counter(), 0);

        source.advance(5);
        let second = clock.tick().unwrap();
        assert_eq!(second.wall_clock_ms(), JAN_1_2024 + 5);
        assert_eq!(second.counter(), 0);
    }

    #[test]
    fn test_tick_within_same_millisecond_increments_counter() {
        let (mut clock, _source) = manual_clock("a", JAN_1_2024);
        let mut previous = clock.tick().unwrap();
        for expected in 1..=1000u32 {
            let next = clock.tick().unwrap();
            assert_eq!(next.counter(), expected);
            assert!(next > previous);
            assert!(next.to_string() > previous.to_string());
            previous = next;
        }
    }

    #[test]
    fn test_tick_survives_wall_clock_going_backwards() {
        let (mut clock, source) = manual_clock("a", JAN_1_2024);
        let before = clock.tick().unwrap();
        source.set(JAN_1_2024 - 60_000);
        let after = clock.tick().unwrap();
        assert!(after > before);
        assert_eq!(after.wall_clock_ms(), JAN_1_2024);
    }

    #[test]
    fn test_counter_exhaustion_spills_into_next_millisecond() {
        let (mut clock, _source) = manual_clock("a", JAN_1_2024);
        let remote = Timestamp::new(JAN_1_2024, u32::MAX - 1, node("b")).unwrap();
        clock.observe(&remote).unwrap();
        assert_eq!(clock.current().counter(), u32::MAX);

        let next = clock.tick().unwrap();
        assert_eq!(next.wall_clock_ms(), JAN_1_2024 + 1);
        assert_eq!(next.counter(), 0);
    }

    #[test]
    fn test_counter_exhaustion_at_max_wall_clock_fails_without_regressing() {
        let (mut clock, _source) = manual_clock("a", MAX_WALL_CLOCK_MS);
        let remote = Timestamp::new(MAX_WALL_CLOCK_MS, u32::MAX, node("b")).unwrap();
        assert_eq!(
            clock.observe(&remote),
            Err(ClockError::WallClockOutOfRange(MAX_WALL_CLOCK_MS))
        );

        let remote = Timestamp::new(MAX_WALL_CLOCK_MS, u32::MAX - 1, node("b")).unwrap();
        clock.observe(&remote).unwrap();
        let last = clock.current();
        assert_eq!(last.counter(), u32::MAX);

        assert_eq!(
            clock.tick(),
            Err(ClockError::WallClockOutOfRange(MAX_WALL_CLOCK_MS))
        );
        assert_eq!(clock.current(), last);
    }

    #[test]
    fn test_observe_remote_ahead() {
        let (mut clock, _source) = manual_clock("local", JAN_1_2024);
        clock.tick().unwrap();

        let remote = Timestamp::new(JAN_1_2024 + 10_000, 7, node("remote")).unwrap();
        clock.observe(&remote).unwrap();

        let current = clock.current();
        assert_eq!(current.wall_clock_ms(), JAN_1_2024 + 10_000);
        assert_eq!(current.counter(), 8);
        assert_eq!(current.node_id().as_str(), "local");

        assert!(clock.tick().unwrap() > remote);
    }

    #[test]
    fn test_observe_equal_wall_clocks_takes_max_counter() {
        let (mut clock, source) = manual_clock("local", JAN_1_2024);
        clock.tick().unwrap();
        clock.tick().unwrap();
        source.set(JAN_1_2024 - 1);

        let remote = Timestamp::new(JAN_1_2024, 4, node("remote")).unwrap();
        clock.observe(&remote).unwrap();
        assert_eq!(clock.current().counter(), 5);
    }

    #[test]
    fn test_observe_local_ahead_increments_local_counter() {
        let (mut clock, source) = manual_clock("local", JAN_1_2024);
        clock.tick().unwrap();
        source.set(0);

        let remote = Timestamp::new(JAN_1_2024 - 1, 99, node("remote")).unwrap();
        clock.observe(&remote).unwrap();
        assert_eq!(clock.current().wall_clock_ms(), JAN_1_2024);
        assert_eq!(clock.current().counter(), 1);
    }

    #[test]
    fn test_observe_resets_when_wall_clock_passes_both() {
        let (mut clock, source) = manual_clock("local", JAN_1_2024);
        clock.tick().unwrap();
        source.set(JAN_1_2024 + 500);

        let remote = Timestamp::new(JAN_1_2024 + 100, 3, node("remote")).unwrap();
        clock.observe(&remote).unwrap();
        assert_eq!(clock.current().wall_clock_ms(), JAN_1_2024 + 500);
        assert_eq!(clock.current().counter(), 0);
    }

    #[test]
    fn test_wall_clock_prefix_bounds_the_millisecond() {
        let ts = Timestamp::new(JAN_1_2024 + 42, 0, node("a")).unwrap();
        let prefix = Timestamp::wall_clock_prefix(JAN_1_2024 + 42);
        assert!(ts.to_string().starts_with(&prefix));
        assert!(ts.to_string() >= prefix);

        let earlier = Timestamp::new(JAN_1_2024 + 41, u32::MAX, node("zzz")).unwrap();
        assert!(earlier.to_string() < prefix);
    }

    #[test]
    fn test_timestamp_serde_as_string() {
        let ts = Timestamp::new(JAN_1_2024, 1, node("a")).unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2024-01-01T00:00:00.000Z 0000000001 a\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
        assert!(serde_json::from_str::<Timestamp>("\"nope\"").is_err());
    }
}
