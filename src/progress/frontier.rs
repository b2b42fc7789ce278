//! Antichains of timestamps, bounding what remains possible in the future.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::order::PartialOrder;
use crate::progress::Timestamp;

/// A report that a timestamp entered (`+1`) or left (`-1`) an antichain.
pub type FrontierChange = (Timestamp, i64);

/// An antichain of pairwise causally-incomparable timestamps.
///
/// Elements are maintained in lexical order, so equal frontiers compare
/// equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontier {
    elements: Vec<Timestamp>,
}

impl Frontier {
    /// An empty frontier, in whose future nothing lies.
    pub fn new() -> Self {
        Frontier {
            elements: Vec::new(),
        }
    }

    /// A frontier holding a single timestamp.
    pub fn from_elem(timestamp: Timestamp) -> Self {
        Frontier {
            elements: vec![timestamp],
        }
    }

    /// The elements of the antichain, in lexical order.
    pub fn elements(&self) -> &[Timestamp] {
        &self.elements
    }

    /// True iff the frontier has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Compares the frontier to a timestamp.
    ///
    /// Returns `Less` if some element is strictly before the timestamp,
    /// `Equal` if an element equals it, `Greater` if the timestamp is
    /// strictly before every element, and `None` otherwise.
    pub fn causal_cmp(&self, timestamp: &Timestamp) -> Option<Ordering> {
        let mut before_all = true;
        for element in &self.elements {
            match element.causal_cmp(timestamp) {
                Some(Ordering::Less) => return Some(Ordering::Less),
                Some(Ordering::Equal) => return Some(Ordering::Equal),
                Some(Ordering::Greater) => {}
                None => before_all = false,
            }
        }
        if before_all {
            Some(Ordering::Greater)
        } else {
            None
        }
    }

    /// True iff the frontier is at or beyond the timestamp.
    pub fn has_passed(&self, timestamp: &Timestamp) -> bool {
        matches!(
            self.causal_cmp(timestamp),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )
    }

    /// Moves the frontier forward to include `timestamp`, retiring any
    /// element it supersedes.
    ///
    /// A no-op if the timestamp is already present. Panics if the timestamp
    /// is strictly before an existing element.
    pub fn advance(&mut self, timestamp: &Timestamp, changes: &mut Vec<FrontierChange>) {
        if self.elements.contains(timestamp) {
            return;
        }
        assert!(
            !self.elements.iter().any(|e| timestamp.less_than(e)),
            "frontier advancing backwards"
        );
        self.elements.retain(|element| {
            if element.less_than(timestamp) {
                changes.push((element.clone(), -1));
                false
            } else {
                true
            }
        });
        self.insert(timestamp, changes);
    }

    /// Moves the frontier backward to include `timestamp`, evicting any
    /// element it shadows.
    ///
    /// A no-op if the frontier has already passed the timestamp.
    pub fn retreat(&mut self, timestamp: &Timestamp, changes: &mut Vec<FrontierChange>) {
        if self.has_passed(timestamp) {
            return;
        }
        self.elements.retain(|element| {
            if timestamp.less_than(element) {
                changes.push((element.clone(), -1));
                false
            } else {
                true
            }
        });
        self.insert(timestamp, changes);
    }

    fn insert(&mut self, timestamp: &Timestamp, changes: &mut Vec<FrontierChange>) {
        if let Err(position) = self.elements.binary_search(timestamp) {
            self.elements.insert(position, timestamp.clone());
            changes.push((timestamp.clone(), 1));
        }
    }
}

/// A frontier derived from a reference-counted multiset of timestamps.
///
/// The frontier is always the antichain of minima of the supported
/// timestamps; updating a support count reports exactly the discrete changes
/// to that antichain, which is what downstream progress tracking reacts to.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SupportedFrontier {
    support: BTreeMap<Timestamp, i64>,
    frontier: Frontier,
}

impl SupportedFrontier {
    /// A frontier with no support.
    pub fn new() -> Self {
        SupportedFrontier {
            support: BTreeMap::new(),
            frontier: Frontier::new(),
        }
    }

    /// The antichain of minima of the supported timestamps.
    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    /// The supported timestamps and their counts, in lexical order.
    pub fn support(&self) -> impl Iterator<Item = (&Timestamp, i64)> {
        self.support.iter().map(|(timestamp, count)| (timestamp, *count))
    }

    /// Compares the derived frontier to a timestamp.
    pub fn causal_cmp(&self, timestamp: &Timestamp) -> Option<Ordering> {
        self.frontier.causal_cmp(timestamp)
    }

    /// Adjusts the support for `timestamp` by `diff`, reporting any changes
    /// to the derived frontier.
    ///
    /// Panics if a support count would go negative.
    pub fn update(
        &mut self,
        timestamp: &Timestamp,
        diff: i64,
        changes: &mut Vec<FrontierChange>,
    ) {
        if diff == 0 {
            return;
        }
        let count = self.support.entry(timestamp.clone()).or_insert(0);
        let was_supported = *count > 0;
        *count += diff;
        assert!(
            *count >= 0,
            "support count for {:?} went negative",
            timestamp
        );
        let is_supported = *count > 0;

        if !is_supported {
            self.support.remove(timestamp);
        }

        match (was_supported, is_supported) {
            (false, true) => {
                // Newly supported: admit unless the frontier already covers it.
                if !self.frontier.has_passed(timestamp) {
                    self.frontier.retreat(timestamp, changes);
                }
            }
            (true, false) => {
                if self.frontier.elements.contains(timestamp) {
                    let position = self
                        .frontier
                        .elements
                        .binary_search(timestamp)
                        .expect("frontier element present");
                    self.frontier.elements.remove(position);
                    changes.push((timestamp.clone(), -1));
                    // Admit minima previously shadowed by the removed element.
                    // The lexical scan visits causally-smaller support first,
                    // so each candidate is checked against every element that
                    // could cover it.
                    let candidates: Vec<Timestamp> = self.support.keys().cloned().collect();
                    for candidate in candidates {
                        if !self.frontier.has_passed(&candidate) {
                            self.frontier.insert(&candidate, changes);
                        }
                    }
                }
            }
            _ => {}
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
    fn retreat_evicts_shadowed_elements() {
        let mut frontier = Frontier::new();
        let mut changes = Vec::new();
        frontier.retreat(&ts(&[2, 1]), &mut changes);
        frontier.retreat(&ts(&[1, 2]), &mut changes);
        assert_eq!(frontier.elements(), &[ts(&[1, 2]), ts(&[2, 1])]);

        changes.clear();
        frontier.retreat(&ts(&[1, 1]), &mut changes);
        assert_eq!(frontier.elements(), &[ts(&[1, 1])]);
        changes.sort();
        assert_eq!(
            changes,
            vec![(ts(&[1, 1]), 1), (ts(&[1, 2]), -1), (ts(&[2, 1]), -1)]
        );
    }

    #[test]
    fn retreat_is_a_no_op_once_passed() {
        let mut frontier = Frontier::from_elem(ts(&[1, 1]));
        let mut changes = Vec::new();
        frontier.retreat(&ts(&[2, 1]), &mut changes);
        assert!(changes.is_empty());
        assert_eq!(frontier.elements(), &[ts(&[1, 1])]);
    }

    #[test]
    fn advance_retires_superseded_elements() {
        let mut frontier = Frontier::from_elem(ts(&[0]));
        let mut changes = Vec::new();
        frontier.advance(&ts(&[2]), &mut changes);
        assert_eq!(frontier.elements(), &[ts(&[2])]);
        assert_eq!(changes, vec![(ts(&[0]), -1), (ts(&[2]), 1)]);
    }

    #[test]
    #[should_panic(expected = "backwards")]
    fn advance_backwards_panics() {
        let mut frontier = Frontier::from_elem(ts(&[2]));
        frontier.advance(&ts(&[1]), &mut Vec::new());
    }

    #[test]
    fn causal_cmp_distinguishes_all_four_outcomes() {
        let mut frontier = Frontier::new();
        let mut changes = Vec::new();
        frontier.retreat(&ts(&[2, 1]), &mut changes);
        frontier.retreat(&ts(&[1, 2]), &mut changes);

        assert_eq!(frontier.causal_cmp(&ts(&[3, 1])), Some(Ordering::Less));
        assert_eq!(frontier.causal_cmp(&ts(&[2, 1])), Some(Ordering::Equal));
        assert_eq!(frontier.causal_cmp(&ts(&[0, 0])), Some(Ordering::Greater));
        assert_eq!(frontier.causal_cmp(&ts(&[0, 3])), None);
    }

    #[test]
    fn empty_frontier_lies_beyond_everything() {
        let frontier = Frontier::new();
        assert_eq!(frontier.causal_cmp(&ts(&[5])), Some(Ordering::Greater));
        assert!(!frontier.has_passed(&ts(&[5])));
    }

    #[test]
    fn support_removal_admits_shadowed_minima() {
        let mut supported = SupportedFrontier::new();
        let mut changes = Vec::new();
        supported.update(&ts(&[0, 0]), 1, &mut changes);
        supported.update(&ts(&[0, 1]), 1, &mut changes);
        supported.update(&ts(&[1, 0]), 1, &mut changes);
        assert_eq!(supported.frontier().elements(), &[ts(&[0, 0])]);

        changes.clear();
        supported.update(&ts(&[0, 0]), -1, &mut changes);
        assert_eq!(
            supported.frontier().elements(),
            &[ts(&[0, 1]), ts(&[1, 0])]
        );
        changes.sort();
        assert_eq!(
            changes,
            vec![(ts(&[0, 0]), -1), (ts(&[0, 1]), 1), (ts(&[1, 0]), 1)]
        );
    }

    #[test]
    fn redundant_support_reports_no_changes() {
        let mut supported = SupportedFrontier::new();
        let mut changes = Vec::new();
        supported.update(&ts(&[0]), 1, &mut changes);
        changes.clear();
        supported.update(&ts(&[0]), 1, &mut changes);
        supported.update(&ts(&[0]), -1, &mut changes);
        assert!(changes.is_empty());
        assert_eq!(supported.frontier().elements(), &[ts(&[0])]);
    }

    #[test]
    #[should_panic(expected = "negative")]
    fn oversubscribed_release_panics() {
        let mut supported = SupportedFrontier::new();
        supported.update(&ts(&[0]), -1, &mut Vec::new());
    }
}
