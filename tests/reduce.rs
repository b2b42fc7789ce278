//! Keyed folds over an indexed input, behind the `reduce` feature.
#![cfg(feature = "reduce")]

use rill::{
    Change, Diff, Graph, GraphBuilder, Node, NodeSpec, Row, Shard, Subgraph, Timestamp, Value,
};

fn sum_graph() -> (Graph, Node, Node) {
    let mut builder = GraphBuilder::new();
    let input = builder.add_node(Subgraph::ROOT, NodeSpec::Input);
    let index = builder.add_node(Subgraph::ROOT, NodeSpec::Index { input });
    let summed = builder.add_node(
        Subgraph::ROOT,
        NodeSpec::Reduce {
            input: index,
            key_columns: 1,
            init: Value::from(0.0),
            logic: Box::new(|acc: &Value, row: &Row, count: usize| match (acc, &row.values()[1]) {
                (Value::Number(acc), Value::Number(term)) => {
                    Value::from(acc + term * count as f64)
                }
                _ => panic!("summed a non-numeric column"),
            }),
        },
    );
    let output = builder.add_node(Subgraph::ROOT, NodeSpec::Output { input: summed });
    (builder.finish().unwrap(), input, output)
}

fn entry(key: &str, number: f64) -> Row {
    Row::new(vec![Value::from(key), Value::from(number)])
}

fn push(shard: &mut Shard, input: Node, row: Row, coords: &[u64], diff: Diff) {
    shard
        .push_input(
            input,
            Change {
                row,
                timestamp: Timestamp::new(coords.to_vec()),
                diff,
            },
        )
        .unwrap();
}

fn drain(shard: &mut Shard) {
    let mut steps = 0;
    while shard.has_work() {
        shard.do_work();
        steps += 1;
        assert!(steps < 10_000, "executor failed to settle");
    }
}

fn pop_all(shard: &mut Shard, output: Node) -> Vec<Change> {
    let mut changes = Vec::new();
    while let Some(batch) = shard.pop_output(output) {
        changes.extend(batch.changes().iter().cloned());
    }
    changes
}

#[test]
fn sums_track_their_key_groups() {
    let (graph, input, output) = sum_graph();
    let mut shard = Shard::new(graph);

    push(&mut shard, input, entry("k", 1.0), &[0], 2);
    push(&mut shard, input, entry("k", 3.0), &[0], 1);
    push(&mut shard, input, entry("m", 5.0), &[0], 1);
    shard.advance_input(input, &Timestamp::new(vec![1]));
    drain(&mut shard);
    shard.validate().unwrap();

    let mut changes = pop_all(&mut shard, output);
    changes.sort();
    assert_eq!(
        changes,
        vec![
            Change {
                row: entry("k", 5.0),
                timestamp: Timestamp::new(vec![0]),
                diff: 1,
            },
            Change {
                row: entry("m", 5.0),
                timestamp: Timestamp::new(vec![0]),
                diff: 1,
            },
        ]
    );

    // Retracting one term moves the key's sum; the old sum is retracted.
    push(&mut shard, input, entry("k", 3.0), &[1], -1);
    shard.advance_input(input, &Timestamp::new(vec![2]));
    drain(&mut shard);

    let mut changes = pop_all(&mut shard, output);
    changes.sort();
    assert_eq!(
        changes,
        vec![
            Change {
                row: entry("k", 2.0),
                timestamp: Timestamp::new(vec![1]),
                diff: 1,
            },
            Change {
                row: entry("k", 5.0),
                timestamp: Timestamp::new(vec![1]),
                diff: -1,
            },
        ]
    );

    // A key folded to nothing disappears entirely.
    push(&mut shard, input, entry("m", 5.0), &[2], -1);
    shard.advance_input(input, &Timestamp::new(vec![3]));
    drain(&mut shard);
    assert_eq!(
        pop_all(&mut shard, output),
        vec![Change {
            row: entry("m", 5.0),
            timestamp: Timestamp::new(vec![2]),
            diff: -1,
        }]
    );
}
