//! Property tests for the structural invariants of batches and frontiers.

use std::collections::BTreeMap;

use proptest::prelude::*;

use rill::{
    Change, ChangeBatchBuilder, Diff, Frontier, Index, PartialOrder, Row, SupportedFrontier,
    Timestamp, Value,
};

use std::rc::Rc;

fn arb_timestamp(len: usize) -> impl Strategy<Value = Timestamp> {
    prop::collection::vec(0..4u64, len).prop_map(Timestamp::new)
}

fn arb_change() -> impl Strategy<Value = Change> {
    ("[a-d]", arb_timestamp(2), -2..=2isize).prop_map(|(name, timestamp, diff)| Change {
        row: Row::new(vec![Value::from(name.as_str())]),
        timestamp,
        diff,
    })
}

fn assert_antichain(frontier: &Frontier) {
    let elements = frontier.elements();
    for (i, a) in elements.iter().enumerate() {
        for b in &elements[i + 1..] {
            assert!(
                a.causal_cmp(b).is_none(),
                "{:?} and {:?} are causally comparable",
                a,
                b
            );
        }
    }
}

proptest! {
    #[test]
    fn batches_cover_and_coalesce_their_changes(changes in prop::collection::vec(arb_change(), 1..24)) {
        let mut totals: BTreeMap<(Row, Timestamp), Diff> = BTreeMap::new();
        for change in &changes {
            *totals.entry((change.row.clone(), change.timestamp.clone())).or_insert(0) += change.diff;
        }
        totals.retain(|_, diff| *diff != 0);

        let mut builder = ChangeBatchBuilder::new();
        for change in changes {
            builder.push(change);
        }
        match builder.finish() {
            None => prop_assert!(totals.is_empty(), "builder dropped surviving changes"),
            Some(batch) => {
                assert_antichain(batch.lower_bound());
                for pair in batch.changes().windows(2) {
                    prop_assert!(
                        (&pair[0].row, &pair[0].timestamp) < (&pair[1].row, &pair[1].timestamp),
                        "batch not strictly sorted"
                    );
                }
                let rebuilt: BTreeMap<(Row, Timestamp), Diff> = batch
                    .changes()
                    .iter()
                    .map(|c| ((c.row.clone(), c.timestamp.clone()), c.diff))
                    .collect();
                prop_assert_eq!(rebuilt, totals);
                for change in batch.changes() {
                    prop_assert!(change.diff != 0);
                    prop_assert!(batch.lower_bound().has_passed(&change.timestamp));
                }
            }
        }
    }

    #[test]
    fn retreating_keeps_frontiers_antichains(timestamps in prop::collection::vec(arb_timestamp(2), 0..24)) {
        let mut frontier = Frontier::new();
        let mut changes = Vec::new();
        for timestamp in &timestamps {
            frontier.retreat(timestamp, &mut changes);
            assert_antichain(&frontier);
        }
        for timestamp in &timestamps {
            prop_assert!(frontier.has_passed(timestamp));
        }
    }

    #[test]
    fn supported_frontier_is_the_minima_of_its_support(timestamps in prop::collection::vec(arb_timestamp(2), 1..16)) {
        let mut supported = SupportedFrontier::new();
        let mut changes = Vec::new();

        let check = |supported: &SupportedFrontier| {
            let keys: Vec<Timestamp> = supported.support().map(|(t, _)| t.clone()).collect();
            let minima: Vec<&Timestamp> = keys
                .iter()
                .filter(|a| !keys.iter().any(|b| b.less_than(a)))
                .collect();
            let frontier: Vec<&Timestamp> = supported.frontier().elements().iter().collect();
            assert_eq!(frontier, minima, "frontier diverged from support minima");
        };

        for timestamp in &timestamps {
            supported.update(timestamp, 1, &mut changes);
            check(&supported);
        }
        for timestamp in &timestamps {
            supported.update(timestamp, -1, &mut changes);
            check(&supported);
        }
        prop_assert!(supported.frontier().is_empty());
    }

    #[test]
    fn coordinate_ops_round_trip(timestamp in arb_timestamp(3), reps in 0..5u64) {
        prop_assert_eq!(timestamp.push_coord().pop_coord(), timestamp.clone());

        let mut incremented = timestamp.clone();
        for _ in 0..reps {
            incremented = incremented.increment_coord();
        }
        let mut coords = timestamp.coords().to_vec();
        *coords.last_mut().unwrap() += reps;
        prop_assert_eq!(incremented, Timestamp::new(coords));
    }

    #[test]
    fn bags_ignore_batches_beyond_the_queried_time(
        earlier in prop::collection::vec(arb_change(), 1..12),
        later in prop::collection::vec(arb_change(), 1..12),
    ) {
        let query = Timestamp::new(vec![1, 1]);

        let mut builder = ChangeBatchBuilder::new();
        for change in earlier {
            builder.push(change);
        }
        let mut index = Index::new();
        if let Some(batch) = builder.finish() {
            index.append(Rc::new(batch));
        }
        let before = index.bag_as_of(&query);

        // Shift every timestamp strictly beyond the query, then re-append.
        let mut builder = ChangeBatchBuilder::new();
        for mut change in later {
            let coords: Vec<u64> = change.timestamp.coords().iter().map(|c| c + 2).collect();
            change.timestamp = Timestamp::new(coords);
            builder.push(change);
        }
        if let Some(batch) = builder.finish() {
            prop_assert!(!batch.lower_bound().has_passed(&query));
            index.append(Rc::new(batch));
        }

        prop_assert_eq!(index.bag_as_of(&query), before);
    }
}
