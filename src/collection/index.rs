//! An append-only log of change batches, queryable as a bag at a time.

use std::rc::Rc;

use crate::collection::{Bag, ChangeBatch};
use crate::order::PartialOrder;
use crate::progress::Timestamp;

/// An append-only list of shared change batches.
///
/// The index never merges or compacts; it is the materialized history of an
/// operator's output, scanned on demand.
#[derive(Clone, Debug, Default)]
pub struct Index {
    change_batches: Vec<Rc<ChangeBatch>>,
}

impl Index {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a batch. O(1).
    pub fn append(&mut self, batch: Rc<ChangeBatch>) {
        self.change_batches.push(batch);
    }

    /// The appended batches, oldest first.
    pub fn change_batches(&self) -> &[Rc<ChangeBatch>] {
        &self.change_batches
    }

    /// Accumulates the bag of rows as of `timestamp`.
    ///
    /// Batches whose lower bound has not passed the timestamp cannot
    /// contribute and are skipped wholesale.
    pub fn bag_as_of(&self, timestamp: &Timestamp) -> Bag {
        let mut bag = Bag::new();
        for batch in &self.change_batches {
            if !batch.lower_bound().has_passed(timestamp) {
                continue;
            }
            for change in batch.changes() {
                if change.timestamp.less_equal(timestamp) {
                    bag.update(&change.row, change.diff);
                }
            }
        }
        bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Change;
    use crate::data::{Row, Value};

    fn change(row: &str, coords: &[u64], diff: isize) -> Change {
        Change {
            row: Row::new(vec![Value::from(row)]),
            timestamp: Timestamp::new(coords.to_vec()),
            diff,
        }
    }

    fn row(name: &str) -> Row {
        Row::new(vec![Value::from(name)])
    }

    #[test]
    fn bag_as_of_accumulates_only_passed_times() {
        let mut index = Index::new();
        index.append(Rc::new(ChangeBatch::from_changes(vec![
            change("a", &[0], 1),
            change("b", &[1], 1),
        ])));
        index.append(Rc::new(ChangeBatch::from_changes(vec![change(
            "a",
            &[2],
            -1,
        )])));

        let at_zero = index.bag_as_of(&Timestamp::new(vec![0]));
        assert_eq!(at_zero.get(&row("a")), 1);
        assert_eq!(at_zero.get(&row("b")), 0);

        let at_one = index.bag_as_of(&Timestamp::new(vec![1]));
        assert_eq!(at_one.get(&row("a")), 1);
        assert_eq!(at_one.get(&row("b")), 1);

        // The retraction at [2] cancels the insertion; zero counts vanish.
        let at_two = index.bag_as_of(&Timestamp::new(vec![2]));
        assert_eq!(at_two.get(&row("a")), 0);
        assert!(!at_two.rows().any(|(r, _)| r == &row("a")));
    }

    #[test]
    fn later_batches_do_not_disturb_earlier_times() {
        let mut index = Index::new();
        index.append(Rc::new(ChangeBatch::from_changes(vec![change(
            "a",
            &[0],
            1,
        )])));
        let before = index.bag_as_of(&Timestamp::new(vec![0]));

        index.append(Rc::new(ChangeBatch::from_changes(vec![change(
            "a",
            &[5],
            1,
        )])));
        let after = index.bag_as_of(&Timestamp::new(vec![0]));
        assert_eq!(before, after);
    }
}
