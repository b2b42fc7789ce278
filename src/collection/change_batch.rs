//! Sorted, coalesced, immutable groups of changes.

use serde::{Deserialize, Serialize};

use crate::data::{Diff, Row};
use crate::progress::{Frontier, Timestamp};

/// A single multiset update: `diff` copies of `row` at `timestamp`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Change {
    /// The data being added or retracted.
    pub row: Row,
    /// The logical time of the update.
    pub timestamp: Timestamp,
    /// How many copies: positive inserts, negative retracts.
    pub diff: Diff,
}

/// Sorts and consolidates `changes`.
///
/// This method will sort `changes` and then consolidate runs of more than one
/// entry with identical row and timestamp by accumulating the diffs. Should
/// the final accumulation be zero, the entry is discarded.
pub fn consolidate(changes: &mut Vec<Change>) {
    if changes.len() <= 1 {
        changes.retain(|change| change.diff != 0);
        return;
    }

    changes.sort_by(|x, y| (&x.row, &x.timestamp).cmp(&(&y.row, &y.timestamp)));

    // Counts the number of distinct known-non-zero accumulations. Indexes the
    // write location.
    let mut offset = 0;
    let mut accum = changes[0].diff;

    for index in 1..changes.len() {
        if changes[index].row == changes[index - 1].row
            && changes[index].timestamp == changes[index - 1].timestamp
        {
            accum += changes[index].diff;
        } else {
            if accum != 0 {
                changes.swap(offset, index - 1);
                changes[offset].diff = accum;
                offset += 1;
            }
            accum = changes[index].diff;
        }
    }
    if accum != 0 {
        let last = changes.len() - 1;
        changes.swap(offset, last);
        changes[offset].diff = accum;
        offset += 1;
    }

    changes.truncate(offset);
}

/// A non-empty, sorted, coalesced group of changes with a precomputed
/// lower-bound antichain.
///
/// Batches are immutable once built and shared by reference between
/// downstream queues and indexes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    changes: Vec<Change>,
    lower_bound: Frontier,
}

impl ChangeBatch {
    /// Consolidates `changes` into a batch.
    ///
    /// Panics if the changes cancel to nothing; use
    /// [`ChangeBatchBuilder::finish`] when emptiness is an expected outcome.
    pub fn from_changes(mut changes: Vec<Change>) -> Self {
        consolidate(&mut changes);
        assert!(!changes.is_empty(), "built an empty change batch");
        Self::from_consolidated(changes)
    }

    fn from_consolidated(changes: Vec<Change>) -> Self {
        let mut lower_bound = Frontier::new();
        let mut scratch = Vec::new();
        for change in &changes {
            lower_bound.retreat(&change.timestamp, &mut scratch);
        }
        ChangeBatch {
            changes,
            lower_bound,
        }
    }

    /// The changes, sorted by (row, timestamp) with no duplicates.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// The antichain of minimal timestamps appearing in the batch.
    pub fn lower_bound(&self) -> &Frontier {
        &self.lower_bound
    }

    /// The number of changes in the batch.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Always false; batches are non-empty by construction.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Accumulates changes and finishes them into a [`ChangeBatch`].
#[derive(Clone, Debug, Default)]
pub struct ChangeBatchBuilder {
    changes: Vec<Change>,
}

impl ChangeBatchBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages one change.
    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    /// True iff no changes have been staged since the last `finish`.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Consolidates the staged changes into a batch, leaving the builder
    /// empty.
    ///
    /// Returns `None` when the staged changes cancel to nothing: an empty
    /// batch carries no information and may not be built.
    pub fn finish(&mut self) -> Option<ChangeBatch> {
        let mut changes = std::mem::take(&mut self.changes);
        consolidate(&mut changes);
        if changes.is_empty() {
            None
        } else {
            Some(ChangeBatch::from_consolidated(changes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;

    fn change(row: &str, coords: &[u64], diff: Diff) -> Change {
        Change {
            row: Row::new(vec![Value::from(row)]),
            timestamp: Timestamp::new(coords.to_vec()),
            diff,
        }
    }

    #[test]
    fn consolidate_sums_and_drops_zeros() {
        let test_cases = vec![
            (
                vec![change("a", &[1], -1), change("b", &[1], -2), change("a", &[1], 1)],
                vec![change("b", &[1], -2)],
            ),
            (
                vec![change("a", &[1], -1), change("b", &[1], 0), change("a", &[1], 1)],
                vec![],
            ),
            (vec![change("a", &[1], 0)], vec![]),
            (
                vec![change("a", &[1], 1), change("b", &[2], 1)],
                vec![change("a", &[1], 1), change("b", &[2], 1)],
            ),
            (
                vec![change("a", &[2], 1), change("a", &[1], 1)],
                vec![change("a", &[1], 1), change("a", &[2], 1)],
            ),
        ];

        for (mut input, output) in test_cases {
            consolidate(&mut input);
            assert_eq!(input, output);
        }
    }

    #[test]
    fn builder_refuses_a_cancelled_batch() {
        let mut builder = ChangeBatchBuilder::new();
        builder.push(change("r", &[0], 1));
        builder.push(change("r", &[0], 1));
        builder.push(change("r", &[0], -2));
        assert_eq!(builder.finish(), None);
        assert!(builder.is_empty());
    }

    #[test]
    fn builder_coalesces_like_changes() {
        let mut builder = ChangeBatchBuilder::new();
        builder.push(change("r", &[0], 1));
        builder.push(change("r", &[0], 1));
        let batch = builder.finish().unwrap();
        assert_eq!(batch.changes(), &[change("r", &[0], 2)]);
    }

    #[test]
    fn lower_bound_is_the_antichain_of_minima() {
        let batch = ChangeBatch::from_changes(vec![
            change("a", &[1, 0], 1),
            change("b", &[0, 1], 1),
            change("c", &[1, 1], 1),
        ]);
        assert_eq!(
            batch.lower_bound().elements(),
            &[
                Timestamp::new(vec![0, 1]),
                Timestamp::new(vec![1, 0])
            ]
        );
        for change in batch.changes() {
            assert!(batch.lower_bound().has_passed(&change.timestamp));
        }
    }

    #[test]
    #[should_panic(expected = "empty change batch")]
    fn constructing_an_empty_batch_panics() {
        let _ = ChangeBatch::from_changes(vec![change("r", &[0], 0)]);
    }
}
