//! Observers and debug events for shard state transitions.
//!
//! The engine announces every state transition to an [`Observer`]. The
//! default observer does nothing and costs nothing; a recording observer
//! snapshots the announced data (by clone) into [`DebugEvent`]s, which is
//! how external inspectors tap the engine without it ever reading their
//! state back.

use serde::{Deserialize, Serialize};

use crate::collection::{Change, ChangeBatch};
use crate::dataflow::{Node, NodeInput};
use crate::progress::{Pointstamp, Timestamp};

/// A sink for shard state transitions, one method per transition.
///
/// All methods default to no-ops; implement only the ones of interest. The
/// engine never mutates its own state through an observer.
pub trait Observer {
    /// A change was staged at an input node.
    fn push_input(&mut self, _node: Node, _change: &Change) {}
    /// An input node's staged changes were built and emitted.
    fn flush_input(&mut self, _node: Node) {}
    /// An input node's frontier advanced.
    fn advance_input(&mut self, _node: Node, _timestamp: &Timestamp) {}
    /// A node emitted a batch to its downstream inputs.
    fn emit_change_batch(&mut self, _node: Node, _batch: &ChangeBatch) {}
    /// A queued batch reached the operator at a node input.
    fn process_change_batch(&mut self, _input: NodeInput, _batch: &ChangeBatch) {}
    /// A pointstamp diff was queued for propagation.
    fn queue_frontier_update(&mut self, _pointstamp: &Pointstamp, _diff: i64) {}
    /// A node's supported frontier absorbed a diff.
    fn apply_frontier_update(&mut self, _node: Node, _timestamp: &Timestamp, _diff: i64) {}
    /// A full propagation pass began.
    fn process_frontier_updates(&mut self) {}
    /// One pointstamp diff was popped and propagated.
    fn process_frontier_update(&mut self, _pointstamp: &Pointstamp, _diff: i64) {}
    /// An operator reacted to its input frontier changing.
    fn process_frontier_update_reaction(&mut self, _node: Node) {}
    /// The host popped (or failed to pop) an output batch.
    fn pop_output(&mut self, _node: Node, _popped: Option<&ChangeBatch>) {}
    /// The executor took a tick.
    fn do_work(&mut self) {}
}

/// The observer used when no other is installed.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// An owned snapshot of one shard state transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DebugEvent {
    /// A change was staged at an input node.
    PushInput {
        /// The input node.
        node: Node,
        /// The staged change.
        change: Change,
    },
    /// An input node's staged changes were built and emitted.
    FlushInput {
        /// The input node.
        node: Node,
    },
    /// An input node's frontier advanced.
    AdvanceInput {
        /// The input node.
        node: Node,
        /// The timestamp the frontier advanced to include.
        timestamp: Timestamp,
    },
    /// A node emitted a batch to its downstream inputs.
    EmitChangeBatch {
        /// The emitting node.
        node: Node,
        /// The emitted batch.
        batch: ChangeBatch,
    },
    /// A queued batch reached the operator at a node input.
    ProcessChangeBatch {
        /// The receiving input.
        input: NodeInput,
        /// The processed batch.
        batch: ChangeBatch,
    },
    /// A pointstamp diff was queued for propagation.
    QueueFrontierUpdate {
        /// The pointstamp.
        pointstamp: Pointstamp,
        /// The signed count.
        diff: i64,
    },
    /// A node's supported frontier absorbed a diff.
    ApplyFrontierUpdate {
        /// The node whose frontier changed.
        node: Node,
        /// The supported timestamp.
        timestamp: Timestamp,
        /// The signed count.
        diff: i64,
    },
    /// A full propagation pass began.
    ProcessFrontierUpdates,
    /// One pointstamp diff was popped and propagated.
    ProcessFrontierUpdate {
        /// The pointstamp.
        pointstamp: Pointstamp,
        /// The signed count.
        diff: i64,
    },
    /// An operator reacted to its input frontier changing.
    ProcessFrontierUpdateReaction {
        /// The reacting node.
        node: Node,
    },
    /// The host popped (or failed to pop) an output batch.
    PopOutput {
        /// The output node.
        node: Node,
        /// The popped batch, if any.
        popped: Option<ChangeBatch>,
    },
    /// The executor took a tick.
    DoWork,
}

/// An observer that records every transition as a [`DebugEvent`].
#[derive(Clone, Debug, Default)]
pub struct EventRecorder {
    events: Vec<DebugEvent>,
}

impl EventRecorder {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded events, oldest first.
    pub fn events(&self) -> &[DebugEvent] {
        &self.events
    }

    /// Consumes the recorder, yielding its events.
    pub fn into_events(self) -> Vec<DebugEvent> {
        self.events
    }
}

impl Observer for EventRecorder {
    fn push_input(&mut self, node: Node, change: &Change) {
        self.events.push(DebugEvent::PushInput {
            node,
            change: change.clone(),
        });
    }

    fn flush_input(&mut self, node: Node) {
        self.events.push(DebugEvent::FlushInput { node });
    }

    fn advance_input(&mut self, node: Node, timestamp: &Timestamp) {
        self.events.push(DebugEvent::AdvanceInput {
            node,
            timestamp: timestamp.clone(),
        });
    }

    fn emit_change_batch(&mut self, node: Node, batch: &ChangeBatch) {
        self.events.push(DebugEvent::EmitChangeBatch {
            node,
            batch: batch.clone(),
        });
    }

    fn process_change_batch(&mut self, input: NodeInput, batch: &ChangeBatch) {
        self.events.push(DebugEvent::ProcessChangeBatch {
            input,
            batch: batch.clone(),
        });
    }

    fn queue_frontier_update(&mut self, pointstamp: &Pointstamp, diff: i64) {
        self.events.push(DebugEvent::QueueFrontierUpdate {
            pointstamp: pointstamp.clone(),
            diff,
        });
    }

    fn apply_frontier_update(&mut self, node: Node, timestamp: &Timestamp, diff: i64) {
        self.events.push(DebugEvent::ApplyFrontierUpdate {
            node,
            timestamp: timestamp.clone(),
            diff,
        });
    }

    fn process_frontier_updates(&mut self) {
        self.events.push(DebugEvent::ProcessFrontierUpdates);
    }

    fn process_frontier_update(&mut self, pointstamp: &Pointstamp, diff: i64) {
        self.events.push(DebugEvent::ProcessFrontierUpdate {
            pointstamp: pointstamp.clone(),
            diff,
        });
    }

    fn process_frontier_update_reaction(&mut self, node: Node) {
        self.events
            .push(DebugEvent::ProcessFrontierUpdateReaction { node });
    }

    fn pop_output(&mut self, node: Node, popped: Option<&ChangeBatch>) {
        self.events.push(DebugEvent::PopOutput {
            node,
            popped: popped.cloned(),
        });
    }

    fn do_work(&mut self) {
        self.events.push(DebugEvent::DoWork);
    }
}
