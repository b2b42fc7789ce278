//! Vector timestamps for nested iterative scopes.
//!
//! A timestamp has one coordinate per enclosing scope: entering a scope
//! appends a zero, iterating increments the last coordinate, and leaving a
//! scope drops it. Timestamps of unequal length belong to different scopes
//! and must never be compared; doing so is a programmer error.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::lattice::Lattice;
use crate::order::PartialOrder;

/// A point in logical time, one coordinate per enclosing scope.
///
/// The derived `Ord` is the *lexical* order, a total extension of the causal
/// order over equal-length timestamps; the causal order itself is available
/// through [`PartialOrder`] and [`Timestamp::causal_cmp`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    coords: Vec<u64>,
}

impl Timestamp {
    /// The least timestamp of the given length: all zeros.
    pub fn least(len: usize) -> Self {
        Timestamp {
            coords: vec![0; len],
        }
    }

    /// Creates a timestamp from its coordinates.
    pub fn new(coords: Vec<u64>) -> Self {
        Timestamp { coords }
    }

    /// The coordinates, outermost scope first.
    pub fn coords(&self) -> &[u64] {
        &self.coords
    }

    /// The number of coordinates.
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    /// True iff the timestamp has no coordinates.
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// The timestamp at which the enclosed scope starts: appends a zero.
    pub fn push_coord(&self) -> Self {
        let mut coords = self.coords.clone();
        coords.push(0);
        Timestamp { coords }
    }

    /// The enclosing scope's view of this timestamp: drops the last
    /// coordinate.
    ///
    /// Panics on a length-0 timestamp.
    pub fn pop_coord(&self) -> Self {
        assert!(
            !self.coords.is_empty(),
            "popped a coordinate off a length-0 timestamp"
        );
        let mut coords = self.coords.clone();
        coords.pop();
        Timestamp { coords }
    }

    /// The next iteration of the innermost scope: increments the last
    /// coordinate.
    ///
    /// Panics on a length-0 timestamp.
    pub fn increment_coord(&self) -> Self {
        assert!(
            !self.coords.is_empty(),
            "incremented a coordinate of a length-0 timestamp"
        );
        let mut coords = self.coords.clone();
        *coords.last_mut().unwrap() += 1;
        Timestamp { coords }
    }

    /// Coordinate-wise comparison under the causal order.
    ///
    /// Returns `None` when the timestamps are incomparable. Panics when the
    /// timestamps have different lengths.
    pub fn causal_cmp(&self, other: &Self) -> Option<Ordering> {
        assert_eq!(
            self.coords.len(),
            other.coords.len(),
            "compared timestamps of unequal length"
        );
        let mut order = Ordering::Equal;
        for (this, that) in self.coords.iter().zip(other.coords.iter()) {
            match (order, this.cmp(that)) {
                (_, Ordering::Equal) => {}
                (Ordering::Equal, next) => order = next,
                (Ordering::Less, Ordering::Greater) | (Ordering::Greater, Ordering::Less) => {
                    return None;
                }
                _ => {}
            }
        }
        Some(order)
    }
}

impl PartialOrder for Timestamp {
    fn less_equal(&self, other: &Self) -> bool {
        matches!(
            self.causal_cmp(other),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )
    }
}

impl Lattice for Timestamp {
    fn join(&self, other: &Self) -> Self {
        assert_eq!(
            self.coords.len(),
            other.coords.len(),
            "joined timestamps of unequal length"
        );
        Timestamp {
            coords: self
                .coords
                .iter()
                .zip(other.coords.iter())
                .map(|(a, b)| std::cmp::max(*a, *b))
                .collect(),
        }
    }

    fn meet(&self, other: &Self) -> Self {
        assert_eq!(
            self.coords.len(),
            other.coords.len(),
            "met timestamps of unequal length"
        );
        Timestamp {
            coords: self
                .coords
                .iter()
                .zip(other.coords.iter())
                .map(|(a, b)| std::cmp::min(*a, *b))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(coords: &[u64]) -> Timestamp {
        Timestamp::new(coords.to_vec())
    }

    #[test]
    fn push_then_pop_round_trips() {
        let time = ts(&[3, 1]);
        assert_eq!(time.push_coord().pop_coord(), time);
        assert_eq!(time.push_coord(), ts(&[3, 1, 0]));
    }

    #[test]
    fn increment_adds_to_the_last_coordinate() {
        let mut time = ts(&[2, 0]);
        for _ in 0..5 {
            time = time.increment_coord();
        }
        assert_eq!(time, ts(&[2, 5]));
    }

    #[test]
    fn causal_cmp_detects_incomparability() {
        assert_eq!(ts(&[1, 0]).causal_cmp(&ts(&[0, 1])), None);
        assert_eq!(ts(&[1, 1]).causal_cmp(&ts(&[0, 1])), Some(Ordering::Greater));
        assert_eq!(ts(&[0, 1]).causal_cmp(&ts(&[0, 1])), Some(Ordering::Equal));
        assert_eq!(ts(&[0, 1]).causal_cmp(&ts(&[1, 1])), Some(Ordering::Less));
    }

    #[test]
    fn lexical_order_extends_causal_order() {
        // Incomparable causally, but lexically ordered.
        assert!(ts(&[0, 1]) < ts(&[1, 0]));
        // Causally ordered pairs agree with the lexical order.
        assert!(ts(&[0, 1]) < ts(&[1, 1]));
    }

    #[test]
    fn join_is_coordinate_wise_max() {
        assert_eq!(ts(&[1, 0]).join(&ts(&[0, 2])), ts(&[1, 2]));
        assert_eq!(ts(&[1, 0]).meet(&ts(&[0, 2])), ts(&[0, 0]));
    }

    #[test]
    #[should_panic(expected = "unequal length")]
    fn comparing_unequal_lengths_panics() {
        let _ = ts(&[1]).causal_cmp(&ts(&[1, 0]));
    }

    #[test]
    #[should_panic(expected = "length-0")]
    fn popping_an_empty_timestamp_panics() {
        let _ = ts(&[]).pop_coord();
    }
}
