//! Merge contract for replicated state.
//!
//! Replicas apply change records in arbitrary order and may see the same
//! record many times. State that implements [`Lattice`] merges with a join
//! that is commutative, associative and idempotent, so every delivery
//! order ends in the same state.

/// State that merges by least upper bound.
pub trait Lattice: Clone + PartialEq {
    /// The state before any write.
    fn bottom() -> Self;

    /// Least upper bound of `self` and `other`.
    fn join(&self, other: &Self) -> Self;

    fn join_assign(&mut self, other: &Self) {
        *self = self.join(other);
    }

    /// True when `other` already contains everything in `self`.
    fn is_covered_by(&self, other: &Self) -> bool {
        &self.join(other) == other
    }

    /// Join every state in `states`, starting from [`Lattice::bottom`].
    fn join_all<'a, I>(states: I) -> Self
    where
        Self: 'a,
        I: IntoIterator<Item = &'a Self>,
    {
        states
            .into_iter()
            .fold(Self::bottom(), |acc, state| acc.join(state))
    }
}
