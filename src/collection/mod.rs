//! Changes, change batches, and materialized collections.

pub mod change_batch;
pub mod index;

pub use change_batch::{consolidate, Change, ChangeBatch, ChangeBatchBuilder};
pub use index::Index;

use fnv::FnvHashMap;

use crate::data::{Diff, Row};

/// A multiset of rows with signed counts and no zero entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bag {
    counts: FnvHashMap<Row, Diff>,
}

impl Bag {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjusts the count for `row` by `diff`, dropping entries that reach
    /// zero so that equal bags compare equal.
    pub fn update(&mut self, row: &Row, diff: Diff) {
        if diff == 0 {
            return;
        }
        let count = self.counts.entry(row.clone()).or_insert(0);
        *count += diff;
        if *count == 0 {
            self.counts.remove(row);
        }
    }

    /// The count for `row`; zero if absent.
    pub fn get(&self, row: &Row) -> Diff {
        self.counts.get(row).copied().unwrap_or(0)
    }

    /// The rows with non-zero counts, in no particular order.
    pub fn rows(&self) -> impl Iterator<Item = (&Row, Diff)> {
        self.counts.iter().map(|(row, count)| (row, *count))
    }

    /// The number of distinct rows.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True iff no row has a non-zero count.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
