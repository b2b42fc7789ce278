//! Input session to simplify driving an input node.

use crate::collection::Change;
use crate::data::{Diff, Row};
use crate::dataflow::{Node, Shard};
use crate::order::PartialOrder;
use crate::progress::Timestamp;

/// A session wrapping one input node of a shard.
///
/// The session stages updates at its current time and keeps that time ahead
/// of the input's frontier, so staging never fails. Dropping the session
/// flushes it.
pub struct InputSession<'a> {
    shard: &'a mut Shard,
    node: Node,
    time: Timestamp,
}

impl<'a> InputSession<'a> {
    /// Creates a session over `node`, starting at the least timestamp.
    pub fn new(shard: &'a mut Shard, node: Node) -> Self {
        let time = Timestamp::least(shard.graph().timestamp_len(node));
        InputSession { shard, node, time }
    }

    /// Adds an element to the collection.
    pub fn insert(&mut self, row: Row) {
        self.update(row, 1);
    }

    /// Removes an element from the collection.
    pub fn remove(&mut self, row: Row) {
        self.update(row, -1);
    }

    /// Adds to the weight of an element in the collection.
    pub fn update(&mut self, row: Row, diff: Diff) {
        self.shard
            .push_input(
                self.node,
                Change {
                    row,
                    timestamp: self.time.clone(),
                    diff,
                },
            )
            .expect("session time never lags its input frontier");
    }

    /// Forces staged updates into the dataflow.
    pub fn flush(&mut self) {
        self.shard.flush_input(self.node);
    }

    /// Flushes, then advances the logical time for future updates.
    pub fn advance_to(&mut self, time: Timestamp) {
        assert!(
            self.time.less_than(&time),
            "advanced a session from {:?} to non-later {:?}",
            self.time,
            time
        );
        self.shard.advance_input(self.node, &time);
        self.time = time;
    }

    /// Reveals the current time of the session.
    pub fn time(&self) -> &Timestamp {
        &self.time
    }
}

impl<'a> Drop for InputSession<'a> {
    fn drop(&mut self) {
        self.shard.flush_input(self.node);
    }
}
