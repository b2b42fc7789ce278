//! The shard: a single-worker executor owning all mutable dataflow state.
//!
//! The shard routes change batches between operators and tracks progress so
//! that stateful operators know when a timestamp can no longer change. Data
//! and progress flow along the same edges: emitting a batch records a
//! pointstamp for each timestamp in its lower bound, and a propagation pass
//! pushes pointstamp diffs through per-node supported frontiers in
//! could-result-in order, which is what makes frontier advancement sound in
//! the presence of feedback edges.

use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use log::{debug, trace};
use thiserror::Error;

use crate::collection::{Change, ChangeBatch, ChangeBatchBuilder, Index};
use crate::dataflow::graph::{Graph, Node, NodeInput, NodeSpec};
use crate::lattice::Lattice;
use crate::logging::{NoopObserver, Observer};
use crate::progress::{Frontier, Pointstamp, SupportedFrontier, Timestamp};

use crate::data::Diff;
#[cfg(feature = "reduce")]
use crate::data::{Row, Value};

/// A recoverable misuse of the shard API.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ShardError {
    /// A pushed change lies strictly before the input's frontier, so its
    /// effects could no longer be ordered with already-finalized output.
    #[error("change at {timestamp:?} is below the input frontier of {node:?}")]
    ChangeBelowFrontier {
        /// The input node.
        node: Node,
        /// The rejected timestamp.
        timestamp: Timestamp,
    },
}

/// Per-node mutable state, parallel to [`NodeSpec`].
enum NodeState {
    Input(InputState),
    Map,
    Index(IndexState),
    Join,
    Output(OutputState),
    TimestampPush,
    TimestampIncrement,
    TimestampPop,
    Union,
    Distinct(DistinctState),
    #[cfg(feature = "reduce")]
    Reduce(ReduceState),
}

struct InputState {
    unflushed: ChangeBatchBuilder,
    frontier: Frontier,
}

struct IndexState {
    index: Index,
    /// Changes held back until the input frontier passes their timestamp.
    pending_changes: Vec<Change>,
}

struct OutputState {
    unpopped_change_batches: VecDeque<Rc<ChangeBatch>>,
}

struct DistinctState {
    /// The operator's own past output, probed to compute deltas.
    index: Index,
    /// Timestamps at which the output may change, closed under join.
    pending_timestamps: BTreeSet<Timestamp>,
}

#[cfg(feature = "reduce")]
struct ReduceState {
    index: Index,
    pending_timestamps: BTreeSet<Timestamp>,
}

/// The single-worker executor.
pub struct Shard {
    graph: Rc<Graph>,
    node_states: Vec<NodeState>,
    node_frontiers: Vec<SupportedFrontier>,
    unprocessed_change_batches: VecDeque<(NodeInput, Rc<ChangeBatch>)>,
    unprocessed_frontier_diffs: BTreeMap<Pointstamp, i64>,
    observer: Box<dyn Observer>,
}

impl Shard {
    /// Creates a shard for `graph` with no observer installed.
    pub fn new(graph: Graph) -> Self {
        Self::with_observer(graph, Box::new(NoopObserver))
    }

    /// Creates a shard for `graph`, announcing transitions to `observer`.
    pub fn with_observer(graph: Graph, observer: Box<dyn Observer>) -> Self {
        let graph = Rc::new(graph);
        let node_states = graph
            .nodes()
            .map(|node| match graph.node_spec(node) {
                NodeSpec::Input => NodeState::Input(InputState {
                    unflushed: ChangeBatchBuilder::new(),
                    frontier: Frontier::from_elem(Timestamp::least(graph.timestamp_len(node))),
                }),
                NodeSpec::Map { .. } => NodeState::Map,
                NodeSpec::Index { .. } => NodeState::Index(IndexState {
                    index: Index::new(),
                    pending_changes: Vec::new(),
                }),
                NodeSpec::Join { .. } => NodeState::Join,
                NodeSpec::Output { .. } => NodeState::Output(OutputState {
                    unpopped_change_batches: VecDeque::new(),
                }),
                NodeSpec::TimestampPush { .. } => NodeState::TimestampPush,
                NodeSpec::TimestampIncrement { .. } => NodeState::TimestampIncrement,
                NodeSpec::TimestampPop { .. } => NodeState::TimestampPop,
                NodeSpec::Union { .. } => NodeState::Union,
                NodeSpec::Distinct { .. } => NodeState::Distinct(DistinctState {
                    index: Index::new(),
                    pending_timestamps: BTreeSet::new(),
                }),
                #[cfg(feature = "reduce")]
                NodeSpec::Reduce { .. } => NodeState::Reduce(ReduceState {
                    index: Index::new(),
                    pending_timestamps: BTreeSet::new(),
                }),
            })
            .collect();

        let node_frontiers = vec![SupportedFrontier::new(); graph.len()];
        let mut shard = Shard {
            graph: Rc::clone(&graph),
            node_states,
            node_frontiers,
            unprocessed_change_batches: VecDeque::new(),
            unprocessed_frontier_diffs: BTreeMap::new(),
            observer,
        };

        // Each input's initial frontier supports its own output.
        let inputs: Vec<Node> = graph
            .nodes()
            .filter(|node| matches!(graph.node_spec(*node), NodeSpec::Input))
            .collect();
        for node in inputs {
            let least = Timestamp::least(graph.timestamp_len(node));
            shard.apply_frontier_update(node, &least, 1);
        }

        debug!("created shard over {} nodes", graph.len());
        shard
    }

    /// The graph this shard executes.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The current output frontier of `node`.
    pub fn node_frontier(&self, node: Node) -> &Frontier {
        self.node_frontiers[node.index()].frontier()
    }

    /// Stages a change at an Input node.
    ///
    /// Returns an error if the change's timestamp lies strictly before the
    /// input's frontier. Panics if `node` is not an Input.
    pub fn push_input(&mut self, node: Node, change: Change) -> Result<(), ShardError> {
        let state = match &mut self.node_states[node.index()] {
            NodeState::Input(state) => state,
            _ => panic!("pushed input into {:?}, which is not an Input node", node),
        };
        if state.frontier.causal_cmp(&change.timestamp) == Some(Ordering::Greater) {
            return Err(ShardError::ChangeBelowFrontier {
                node,
                timestamp: change.timestamp,
            });
        }
        self.observer.push_input(node, &change);
        state.unflushed.push(change);
        Ok(())
    }

    /// Builds and emits an Input node's staged changes, if any.
    ///
    /// Panics if `node` is not an Input.
    pub fn flush_input(&mut self, node: Node) {
        let finished = match &mut self.node_states[node.index()] {
            NodeState::Input(state) => {
                if state.unflushed.is_empty() {
                    return;
                }
                self.observer.flush_input(node);
                state.unflushed.finish()
            }
            _ => panic!("flushed {:?}, which is not an Input node", node),
        };
        if let Some(batch) = finished {
            self.emit_change_batch(node, batch);
        }
    }

    /// Flushes, then advances the Input's frontier to include `timestamp`.
    ///
    /// Panics if `node` is not an Input, or if the frontier would move
    /// backwards.
    pub fn advance_input(&mut self, node: Node, timestamp: &Timestamp) {
        self.flush_input(node);
        self.observer.advance_input(node, timestamp);
        let mut changes = Vec::new();
        match &mut self.node_states[node.index()] {
            NodeState::Input(state) => state.frontier.advance(timestamp, &mut changes),
            _ => panic!("advanced {:?}, which is not an Input node", node),
        }
        for (changed, diff) in changes {
            self.apply_frontier_update(node, &changed, diff);
        }
    }

    /// Pops one batch from an Output node's queue.
    ///
    /// Panics if `node` is not an Output.
    pub fn pop_output(&mut self, node: Node) -> Option<Rc<ChangeBatch>> {
        let popped = match &mut self.node_states[node.index()] {
            NodeState::Output(state) => state.unpopped_change_batches.pop_front(),
            _ => panic!("popped output from {:?}, which is not an Output node", node),
        };
        self.observer.pop_output(node, popped.as_deref());
        popped
    }

    /// True iff a call to [`Shard::do_work`] would do anything.
    pub fn has_work(&self) -> bool {
        !self.unprocessed_change_batches.is_empty() || !self.unprocessed_frontier_diffs.is_empty()
    }

    /// Takes one executor tick: processes one queued change batch, or, only
    /// once none remain, runs a full frontier-propagation pass.
    ///
    /// Batches go first so that an operator never observes a change arriving
    /// behind its own reported frontier.
    pub fn do_work(&mut self) {
        self.observer.do_work();
        if let Some((input, batch)) = self.unprocessed_change_batches.pop_front() {
            self.process_change_batch(input, batch);
        } else if !self.unprocessed_frontier_diffs.is_empty() {
            self.process_frontier_updates();
        }
    }

    // Emits `batch` from `node`: queues it at every downstream input, and
    // records a pointstamp for each lower-bound timestamp at each of them.
    fn emit_change_batch(&mut self, node: Node, batch: ChangeBatch) {
        self.emit_shared(node, Rc::new(batch));
    }

    fn emit_shared(&mut self, node: Node, batch: Rc<ChangeBatch>) {
        self.observer.emit_change_batch(node, &batch);
        debug_assert!(
            batch.changes().iter().all(|change| {
                self.node_frontiers[node.index()].causal_cmp(&change.timestamp)
                    != Some(Ordering::Greater)
            }),
            "node {:?} emitted a change its output frontier has already passed",
            node
        );
        let path = self.graph.scope_path(node).to_vec();
        let downstream = self.graph.downstream(node).to_vec();
        for input in downstream {
            for timestamp in batch.lower_bound().elements() {
                let pointstamp = Pointstamp::new(input, path.clone(), timestamp.clone());
                self.queue_frontier_update(pointstamp, 1);
            }
            self.unprocessed_change_batches
                .push_back((input, Rc::clone(&batch)));
        }
    }

    fn queue_frontier_update(&mut self, pointstamp: Pointstamp, diff: i64) {
        if diff == 0 {
            return;
        }
        self.observer.queue_frontier_update(&pointstamp, diff);
        match self.unprocessed_frontier_diffs.entry(pointstamp) {
            Entry::Occupied(mut occupied) => {
                *occupied.get_mut() += diff;
                if *occupied.get() == 0 {
                    occupied.remove();
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(diff);
            }
        }
    }

    // Adjusts `node`'s supported frontier and fans any discrete frontier
    // changes out to its downstream inputs. Returns whether the frontier
    // changed.
    fn apply_frontier_update(&mut self, node: Node, timestamp: &Timestamp, diff: i64) -> bool {
        self.observer.apply_frontier_update(node, timestamp, diff);
        let mut changes = Vec::new();
        self.node_frontiers[node.index()].update(timestamp, diff, &mut changes);
        if changes.is_empty() {
            return false;
        }
        let path = self.graph.scope_path(node).to_vec();
        let downstream = self.graph.downstream(node).to_vec();
        for (changed, delta) in changes {
            for input in &downstream {
                let pointstamp = Pointstamp::new(*input, path.clone(), changed.clone());
                self.queue_frontier_update(pointstamp, delta);
            }
        }
        true
    }

    fn process_change_batch(&mut self, input: NodeInput, batch: Rc<ChangeBatch>) {
        self.observer.process_change_batch(input, &batch);

        // Release the in-flight support recorded when the batch was queued.
        let upstream = self.graph.upstream(input);
        let path = self.graph.scope_path(upstream).to_vec();
        for timestamp in batch.lower_bound().elements().to_vec() {
            self.queue_frontier_update(Pointstamp::new(input, path.clone(), timestamp), -1);
        }

        let node = input.node;
        let graph = Rc::clone(&self.graph);
        match graph.node_spec(node) {
            NodeSpec::Input => {
                panic!("Input node {:?} received a change batch", node);
            }

            NodeSpec::Map { logic, .. } => {
                let mut builder = ChangeBatchBuilder::new();
                for change in batch.changes() {
                    builder.push(Change {
                        row: logic(&change.row),
                        timestamp: change.timestamp.clone(),
                        diff: change.diff,
                    });
                }
                if let Some(out) = builder.finish() {
                    self.emit_change_batch(node, out);
                }
            }

            NodeSpec::Index { .. } => {
                // Hold a capability at each change's timestamp until the
                // input frontier passes it.
                let changes = batch.changes().to_vec();
                for change in &changes {
                    self.apply_frontier_update(node, &change.timestamp, 1);
                }
                match &mut self.node_states[node.index()] {
                    NodeState::Index(state) => state.pending_changes.extend(changes),
                    _ => unreachable!("index spec with non-index state"),
                }
            }

            NodeSpec::Join {
                inputs,
                key_columns,
            } => {
                assert!(
                    input.port < 2,
                    "join {:?} received a batch on port {}",
                    node,
                    input.port
                );
                let other = inputs[1 - input.port];
                let mut builder = ChangeBatchBuilder::new();
                {
                    let other_index = self.index_of(other);
                    for change in batch.changes() {
                        for other_batch in other_index.change_batches() {
                            for other_change in other_batch.changes() {
                                if change.row.key(*key_columns)
                                    != other_change.row.key(*key_columns)
                                {
                                    continue;
                                }
                                // Port 0 is the left-hand side of the output.
                                let row = if input.port == 0 {
                                    change.row.concat(&other_change.row)
                                } else {
                                    other_change.row.concat(&change.row)
                                };
                                builder.push(Change {
                                    row,
                                    timestamp: change
                                        .timestamp
                                        .join(&other_change.timestamp),
                                    diff: change.diff * other_change.diff,
                                });
                            }
                        }
                    }
                }
                if let Some(out) = builder.finish() {
                    self.emit_change_batch(node, out);
                }
            }

            NodeSpec::Output { .. } => match &mut self.node_states[node.index()] {
                NodeState::Output(state) => state.unpopped_change_batches.push_back(batch),
                _ => unreachable!("output spec with non-output state"),
            },

            NodeSpec::TimestampPush { .. } => {
                self.retime_and_emit(node, &batch, Timestamp::push_coord);
            }
            NodeSpec::TimestampIncrement { .. } => {
                self.retime_and_emit(node, &batch, Timestamp::increment_coord);
            }
            NodeSpec::TimestampPop { .. } => {
                self.retime_and_emit(node, &batch, Timestamp::pop_coord);
            }

            NodeSpec::Union { .. } => {
                self.emit_shared(node, batch);
            }

            NodeSpec::Distinct { .. } => {
                let newly_pending = match &mut self.node_states[node.index()] {
                    NodeState::Distinct(state) => {
                        Self::stage_pending_timestamps(&mut state.pending_timestamps, &batch)
                    }
                    _ => unreachable!("distinct spec with non-distinct state"),
                };
                for timestamp in newly_pending {
                    self.apply_frontier_update(node, &timestamp, 1);
                }
            }

            #[cfg(feature = "reduce")]
            NodeSpec::Reduce { .. } => {
                let newly_pending = match &mut self.node_states[node.index()] {
                    NodeState::Reduce(state) => {
                        Self::stage_pending_timestamps(&mut state.pending_timestamps, &batch)
                    }
                    _ => unreachable!("reduce spec with non-reduce state"),
                };
                for timestamp in newly_pending {
                    self.apply_frontier_update(node, &timestamp, 1);
                }
            }
        }
    }

    // Adds each incoming timestamp to `pending` and re-closes the set under
    // join: two incomparable pending timestamps can both influence the output
    // at their join, so that time must be pending too. Returns the
    // timestamps that are new, each of which needs a capability.
    fn stage_pending_timestamps(
        pending: &mut BTreeSet<Timestamp>,
        batch: &ChangeBatch,
    ) -> Vec<Timestamp> {
        let mut closed: Vec<Timestamp> = pending.iter().cloned().collect();
        for change in batch.changes() {
            if !closed.contains(&change.timestamp) {
                closed.push(change.timestamp.clone());
            }
        }
        crate::lattice::close_under_join(&mut closed);

        let mut newly_pending = Vec::new();
        for timestamp in closed {
            if pending.insert(timestamp.clone()) {
                newly_pending.push(timestamp);
            }
        }
        newly_pending
    }

    fn retime_and_emit(
        &mut self,
        node: Node,
        batch: &ChangeBatch,
        retime: impl Fn(&Timestamp) -> Timestamp,
    ) {
        let mut builder = ChangeBatchBuilder::new();
        for change in batch.changes() {
            builder.push(Change {
                row: change.row.clone(),
                timestamp: retime(&change.timestamp),
                diff: change.diff,
            });
        }
        if let Some(out) = builder.finish() {
            self.emit_change_batch(node, out);
        }
    }

    fn index_of(&self, node: Node) -> &Index {
        match &self.node_states[node.index()] {
            NodeState::Index(state) => &state.index,
            NodeState::Distinct(state) => &state.index,
            #[cfg(feature = "reduce")]
            NodeState::Reduce(state) => &state.index,
            _ => panic!("node {:?} holds no index", node),
        }
    }

    // One full propagation pass, followed by the reactions it enables.
    fn process_frontier_updates(&mut self) {
        self.observer.process_frontier_updates();

        let mut moved = 0usize;
        while let Some((pointstamp, diff)) = self.unprocessed_frontier_diffs.pop_first() {
            self.observer.process_frontier_update(&pointstamp, diff);
            let node = pointstamp.location.node;
            let output_timestamp = match self.graph.node_spec(node) {
                NodeSpec::TimestampPush { .. } => pointstamp.timestamp.push_coord(),
                NodeSpec::TimestampIncrement { .. } => pointstamp.timestamp.increment_coord(),
                NodeSpec::TimestampPop { .. } => pointstamp.timestamp.pop_coord(),
                _ => pointstamp.timestamp.clone(),
            };
            if self.apply_frontier_update(node, &output_timestamp, diff) {
                moved += 1;
            }
        }
        trace!("propagated frontier diffs; {} frontiers moved", moved);

        // Reactions sweep every stateful operator, in ascending node order so
        // that an Index emission earlier in the sweep is visible to a
        // Distinct reacting later in it. An operator whose pending work is
        // not yet resolved reacts as a no-op; sweeping unconditionally is
        // what keeps work staged between two passes from being stranded.
        let graph = Rc::clone(&self.graph);
        for node in graph.nodes() {
            match graph.node_spec(node) {
                NodeSpec::Index { input } => {
                    self.index_reaction(node, *input);
                }
                NodeSpec::Distinct { input } => {
                    self.distinct_reaction(node, *input);
                }
                #[cfg(feature = "reduce")]
                NodeSpec::Reduce { input, .. } => {
                    self.reduce_reaction(node, *input);
                }
                _ => {}
            }
        }
    }

    // Moves pending changes the input frontier has passed into the index,
    // emits them, and releases their capabilities.
    fn index_reaction(&mut self, node: Node, input: Node) -> bool {
        let input_frontier = self.node_frontiers[input.index()].frontier().clone();

        let pending = match &mut self.node_states[node.index()] {
            NodeState::Index(state) => std::mem::take(&mut state.pending_changes),
            _ => unreachable!("index spec with non-index state"),
        };
        // A change is ready once no frontier element is at or before its
        // timestamp: nothing that could still arrive can be ordered with it.
        let (ready, rest): (Vec<Change>, Vec<Change>) = pending
            .into_iter()
            .partition(|change| !input_frontier.has_passed(&change.timestamp));
        match &mut self.node_states[node.index()] {
            NodeState::Index(state) => state.pending_changes = rest,
            _ => unreachable!(),
        }
        if ready.is_empty() {
            return false;
        }
        self.observer.process_frontier_update_reaction(node);

        let mut builder = ChangeBatchBuilder::new();
        for change in &ready {
            builder.push(change.clone());
        }
        let mut acted = false;
        if let Some(out) = builder.finish() {
            let shared = Rc::new(out);
            match &mut self.node_states[node.index()] {
                NodeState::Index(state) => state.index.append(Rc::clone(&shared)),
                _ => unreachable!(),
            }
            self.emit_shared(node, shared);
            acted = true;
        }
        for change in ready {
            acted |= self.apply_frontier_update(node, &change.timestamp, -1);
        }
        acted
    }

    // Resolves pending timestamps the input frontier is strictly past, in
    // lexical order, reconciling the input bag against the operator's own
    // output at multiplicity at most one.
    fn distinct_reaction(&mut self, node: Node, input: Node) -> bool {
        let input_frontier = self.node_frontiers[input.index()].frontier().clone();

        // BTreeSet iteration is lexically ascending, which is the total
        // extension of the causal order the resolution relies on.
        let ready: Vec<Timestamp> = match &self.node_states[node.index()] {
            NodeState::Distinct(state) => state
                .pending_timestamps
                .iter()
                .filter(|timestamp| !input_frontier.has_passed(timestamp))
                .cloned()
                .collect(),
            _ => unreachable!("distinct spec with non-distinct state"),
        };
        if ready.is_empty() {
            return false;
        }
        self.observer.process_frontier_update_reaction(node);

        let mut acted = false;
        for timestamp in &ready {
            let new_bag = self.index_of(input).bag_as_of(timestamp);
            let old_bag = self.index_of(node).bag_as_of(timestamp);

            let mut builder = ChangeBatchBuilder::new();
            for (row, count) in new_bag.rows() {
                // At most one copy of each row; non-positive counts excluded.
                let target: Diff = if count > 0 { 1 } else { 0 };
                let old = old_bag.get(row);
                if target != old {
                    builder.push(Change {
                        row: row.clone(),
                        timestamp: timestamp.clone(),
                        diff: target - old,
                    });
                }
            }
            for (row, old) in old_bag.rows() {
                if new_bag.get(row) == 0 {
                    builder.push(Change {
                        row: row.clone(),
                        timestamp: timestamp.clone(),
                        diff: -old,
                    });
                }
            }

            if let Some(out) = builder.finish() {
                let shared = Rc::new(out);
                match &mut self.node_states[node.index()] {
                    NodeState::Distinct(state) => state.index.append(Rc::clone(&shared)),
                    _ => unreachable!(),
                }
                self.emit_shared(node, shared);
                acted = true;
            }
        }

        for timestamp in ready {
            match &mut self.node_states[node.index()] {
                NodeState::Distinct(state) => state.pending_timestamps.remove(&timestamp),
                _ => unreachable!(),
            };
            acted |= self.apply_frontier_update(node, &timestamp, -1);
        }
        acted
    }

    #[cfg(feature = "reduce")]
    fn reduce_reaction(&mut self, node: Node, input: Node) -> bool {
        let input_frontier = self.node_frontiers[input.index()].frontier().clone();

        let ready: Vec<Timestamp> = match &self.node_states[node.index()] {
            NodeState::Reduce(state) => state
                .pending_timestamps
                .iter()
                .filter(|timestamp| !input_frontier.has_passed(timestamp))
                .cloned()
                .collect(),
            _ => unreachable!("reduce spec with non-reduce state"),
        };
        if ready.is_empty() {
            return false;
        }
        self.observer.process_frontier_update_reaction(node);

        let graph = Rc::clone(&self.graph);
        let (key_columns, init, logic) = match graph.node_spec(node) {
            NodeSpec::Reduce {
                key_columns,
                init,
                logic,
                ..
            } => (*key_columns, init, logic),
            _ => unreachable!(),
        };

        let mut acted = false;
        for timestamp in &ready {
            let input_bag = self.index_of(input).bag_as_of(timestamp);

            // Fold each key group in lexical row order.
            let mut groups: BTreeMap<Vec<Value>, Vec<(Row, Diff)>> = BTreeMap::new();
            for (row, count) in input_bag.rows() {
                groups
                    .entry(row.key(key_columns).to_vec())
                    .or_default()
                    .push((row.clone(), count));
            }
            let mut target_rows: BTreeSet<Row> = BTreeSet::new();
            for (key, mut rows) in groups {
                rows.sort();
                let mut accumulator = init.clone();
                let mut any = false;
                for (row, count) in rows {
                    if count > 0 {
                        accumulator = logic(&accumulator, &row, count as usize);
                        any = true;
                    }
                }
                if any {
                    let mut values = key;
                    values.push(accumulator);
                    target_rows.insert(Row::new(values));
                }
            }

            let old_bag = self.index_of(node).bag_as_of(timestamp);
            let mut builder = ChangeBatchBuilder::new();
            for row in &target_rows {
                let old = old_bag.get(row);
                if old != 1 {
                    builder.push(Change {
                        row: row.clone(),
                        timestamp: timestamp.clone(),
                        diff: 1 - old,
                    });
                }
            }
            for (row, old) in old_bag.rows() {
                if !target_rows.contains(row) {
                    builder.push(Change {
                        row: row.clone(),
                        timestamp: timestamp.clone(),
                        diff: -old,
                    });
                }
            }

            if let Some(out) = builder.finish() {
                let shared = Rc::new(out);
                match &mut self.node_states[node.index()] {
                    NodeState::Reduce(state) => state.index.append(Rc::clone(&shared)),
                    _ => unreachable!(),
                }
                self.emit_shared(node, shared);
                acted = true;
            }
        }

        for timestamp in ready {
            match &mut self.node_states[node.index()] {
                NodeState::Reduce(state) => state.pending_timestamps.remove(&timestamp),
                _ => unreachable!(),
            };
            acted |= self.apply_frontier_update(node, &timestamp, -1);
        }
        acted
    }

    /// Checks every structural invariant an external observer can see:
    /// antichain properties, support/minima agreement, batch well-formedness
    /// wherever batches are held, and that no stateful operator holds work
    /// its input frontier has already resolved.
    ///
    /// Intended for tests; returns a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        for node in self.graph.nodes() {
            let supported = &self.node_frontiers[node.index()];
            validate_antichain(supported.frontier())
                .map_err(|e| format!("{:?} output frontier: {}", node, e))?;
            validate_support(supported).map_err(|e| format!("{:?} support: {}", node, e))?;

            match &self.node_states[node.index()] {
                NodeState::Input(state) => {
                    validate_antichain(&state.frontier)
                        .map_err(|e| format!("{:?} input frontier: {}", node, e))?;
                }
                NodeState::Index(state) => {
                    for batch in state.index.change_batches() {
                        validate_batch(batch).map_err(|e| format!("{:?} index: {}", node, e))?;
                    }
                }
                NodeState::Distinct(state) => {
                    for batch in state.index.change_batches() {
                        validate_batch(batch).map_err(|e| format!("{:?} index: {}", node, e))?;
                    }
                    if !self.has_work() {
                        let input = match self.graph.node_spec(node) {
                            NodeSpec::Distinct { input } => *input,
                            _ => unreachable!(),
                        };
                        let input_frontier = self.node_frontiers[input.index()].frontier();
                        for timestamp in &state.pending_timestamps {
                            if !input_frontier.has_passed(timestamp) {
                                return Err(format!(
                                    "{:?} holds pending timestamp {:?} its input frontier resolved",
                                    node, timestamp
                                ));
                            }
                        }
                    }
                }
                NodeState::Output(state) => {
                    for batch in &state.unpopped_change_batches {
                        validate_batch(batch).map_err(|e| format!("{:?} output: {}", node, e))?;
                    }
                }
                _ => {}
            }
        }
        for (_, batch) in &self.unprocessed_change_batches {
            validate_batch(batch).map_err(|e| format!("queued batch: {}", e))?;
        }
        Ok(())
    }
}

fn validate_antichain(frontier: &Frontier) -> Result<(), String> {
    use itertools::Itertools;
    for (a, b) in frontier.elements().iter().tuple_combinations() {
        if a.causal_cmp(b).is_some() {
            return Err(format!("elements {:?} and {:?} are comparable", a, b));
        }
    }
    Ok(())
}

fn validate_support(supported: &SupportedFrontier) -> Result<(), String> {
    let timestamps: Vec<&Timestamp> = supported.support().map(|(t, _)| t).collect();
    for (timestamp, count) in supported.support() {
        if count <= 0 {
            return Err(format!("{:?} has non-positive count {}", timestamp, count));
        }
    }
    let minima: Vec<&Timestamp> = timestamps
        .iter()
        .filter(|a| {
            !timestamps
                .iter()
                .any(|b| b.causal_cmp(a) == Some(Ordering::Less))
        })
        .copied()
        .collect();
    let frontier: Vec<&Timestamp> = supported.frontier().elements().iter().collect();
    if minima != frontier {
        return Err(format!(
            "frontier {:?} is not the minima {:?} of the support",
            frontier, minima
        ));
    }
    Ok(())
}


fn validate_batch(batch: &ChangeBatch) -> Result<(), String> {
    if batch.changes().is_empty() {
        return Err("batch is empty".to_string());
    }
    validate_antichain(batch.lower_bound())?;
    for pair in batch.changes().windows(2) {
        let this = (&pair[0].row, &pair[0].timestamp);
        let that = (&pair[1].row, &pair[1].timestamp);
        if this >= that {
            return Err(format!("changes out of order: {:?} then {:?}", pair[0], pair[1]));
        }
    }
    for change in batch.changes() {
        if change.diff == 0 {
            return Err(format!("zero diff for {:?}", change.row));
        }
        if !batch.lower_bound().has_passed(&change.timestamp) {
            return Err(format!(
                "lower bound {:?} has not passed change at {:?}",
                batch.lower_bound(),
                change.timestamp
            ));
        }
    }
    Ok(())
}
