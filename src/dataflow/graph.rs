//! Dataflow graph description, construction, and validation.
//!
//! A graph is built mutably through [`GraphBuilder`] and frozen by
//! [`GraphBuilder::finish`], which validates the topology and derives the
//! lookup tables the executor needs. Nodes are addressed by integer id; the
//! only backward edge is the late-bound input of a `TimestampIncrement`,
//! which is what lets iteration express a cycle without pointer cycles.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::Row;
#[cfg(feature = "reduce")]
use crate::data::Value;

/// A node identity within a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Node(usize);

impl Node {
    /// The node with the given index.
    pub fn from_index(index: usize) -> Self {
        Node(index)
    }

    /// The index of the node.
    pub fn index(self) -> usize {
        self.0
    }
}

/// One of a node's input ports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeInput {
    /// The receiving node.
    pub node: Node,
    /// The input port: 0, or 1 for the right side of a two-input operator.
    pub port: usize,
}

/// An iteration scope. Subgraph 0 is the root; every other subgraph has a
/// parent with a strictly smaller id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subgraph(usize);

impl Subgraph {
    /// The root scope.
    pub const ROOT: Subgraph = Subgraph(0);

    /// The subgraph with the given index.
    pub fn from_index(index: usize) -> Self {
        Subgraph(index)
    }

    /// The index of the subgraph.
    pub fn index(self) -> usize {
        self.0
    }
}

/// The logic a `Map` node applies to each row.
pub type MapLogic = Box<dyn Fn(&Row) -> Row>;

/// The logic a `Reduce` node folds rows with: (accumulator, row, count).
#[cfg(feature = "reduce")]
pub type ReduceLogic = Box<dyn Fn(&Value, &Row, usize) -> Value>;

/// What a node computes.
pub enum NodeSpec {
    /// A source of externally pushed changes.
    Input,
    /// Applies `logic` to every row, preserving time and diff.
    Map {
        /// The node whose output is mapped.
        input: Node,
        /// The per-row transformation.
        logic: MapLogic,
    },
    /// Materializes its input as an append-only index.
    Index {
        /// The node whose output is indexed.
        input: Node,
    },
    /// Joins two indexed inputs on a key prefix.
    Join {
        /// The two indexable nodes being joined.
        inputs: [Node; 2],
        /// How many leading values form the key.
        key_columns: usize,
    },
    /// Queues batches for the host to pop.
    Output {
        /// The node whose output is queued.
        input: Node,
    },
    /// Enters a nested scope: appends a zero coordinate.
    TimestampPush {
        /// A node in the parent scope.
        input: Node,
    },
    /// Iterates: increments the last coordinate. The input binds late,
    /// closing the loop; see [`GraphBuilder::connect_loop`].
    TimestampIncrement {
        /// The node feeding back, defined later than this one.
        input: Option<Node>,
    },
    /// Leaves a nested scope: drops the last coordinate.
    TimestampPop {
        /// A node in a child scope.
        input: Node,
    },
    /// Forwards both inputs unchanged.
    Union {
        /// The two nodes being merged.
        inputs: [Node; 2],
    },
    /// Reduces its indexed input to at most one copy of each row.
    Distinct {
        /// The indexable node whose output is made a set.
        input: Node,
    },
    /// Folds the rows of each key group into a single value.
    #[cfg(feature = "reduce")]
    Reduce {
        /// The indexable node whose output is folded.
        input: Node,
        /// How many leading values form the key.
        key_columns: usize,
        /// The initial accumulator value.
        init: Value,
        /// The fold: (accumulator, row, count) to new accumulator.
        logic: ReduceLogic,
    },
}

impl NodeSpec {
    /// The upstream nodes, in port order. An unconnected loop input is
    /// omitted; `finish` rejects such graphs.
    pub fn inputs(&self) -> Vec<Node> {
        match self {
            NodeSpec::Input => vec![],
            NodeSpec::Map { input, .. }
            | NodeSpec::Index { input }
            | NodeSpec::Output { input }
            | NodeSpec::TimestampPush { input }
            | NodeSpec::TimestampPop { input }
            | NodeSpec::Distinct { input } => vec![*input],
            NodeSpec::TimestampIncrement { input } => input.iter().copied().collect(),
            NodeSpec::Join { inputs, .. } | NodeSpec::Union { inputs } => inputs.to_vec(),
            #[cfg(feature = "reduce")]
            NodeSpec::Reduce { input, .. } => vec![*input],
        }
    }

    /// True iff the node materializes an index that other operators may
    /// probe.
    pub fn is_indexable(&self) -> bool {
        match self {
            NodeSpec::Index { .. } | NodeSpec::Distinct { .. } => true,
            #[cfg(feature = "reduce")]
            NodeSpec::Reduce { .. } => true,
            _ => false,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            NodeSpec::Input => "Input",
            NodeSpec::Map { .. } => "Map",
            NodeSpec::Index { .. } => "Index",
            NodeSpec::Join { .. } => "Join",
            NodeSpec::Output { .. } => "Output",
            NodeSpec::TimestampPush { .. } => "TimestampPush",
            NodeSpec::TimestampIncrement { .. } => "TimestampIncrement",
            NodeSpec::TimestampPop { .. } => "TimestampPop",
            NodeSpec::Union { .. } => "Union",
            NodeSpec::Distinct { .. } => "Distinct",
            #[cfg(feature = "reduce")]
            NodeSpec::Reduce { .. } => "Reduce",
        }
    }
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct(self.name());
        match self {
            NodeSpec::TimestampIncrement { input } => {
                builder.field("input", input);
            }
            NodeSpec::Join {
                inputs,
                key_columns,
            } => {
                builder.field("inputs", inputs).field("key_columns", key_columns);
            }
            #[cfg(feature = "reduce")]
            NodeSpec::Reduce {
                input,
                key_columns,
                init,
                ..
            } => {
                builder
                    .field("input", input)
                    .field("key_columns", key_columns)
                    .field("init", init);
            }
            other => {
                let inputs = other.inputs();
                if !inputs.is_empty() {
                    builder.field("inputs", &inputs);
                }
            }
        }
        builder.finish()
    }
}

/// A reason graph construction failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An input refers to a node the graph does not contain.
    #[error("node {node:?} reads from undefined node {input:?}")]
    UndefinedInput {
        /// The node with the dangling input.
        node: Node,
        /// The missing upstream.
        input: Node,
    },
    /// A forward edge points backward.
    #[error("node {node:?} must be defined after its input {input:?}")]
    InputNotEarlier {
        /// The offending node.
        node: Node,
        /// Its input.
        input: Node,
    },
    /// A loop edge points forward.
    #[error("loop node {node:?} must feed back from a later node, not {input:?}")]
    LoopInputNotLater {
        /// The increment node.
        node: Node,
        /// Its input.
        input: Node,
    },
    /// A `TimestampIncrement` was never given its feedback edge.
    #[error("loop node {node:?} was never connected")]
    LoopNotConnected {
        /// The increment node.
        node: Node,
    },
    /// A probing operator reads from a node that holds no index.
    #[error("node {node:?} requires an indexable input, but {input:?} holds no index")]
    InputNotIndexable {
        /// The join/distinct node.
        node: Node,
        /// Its non-indexable input.
        input: Node,
    },
    /// A `TimestampPush` must read from the parent of its own scope.
    #[error("timestamp push {node:?} must read from the parent scope of its own")]
    PushInputNotParent {
        /// The push node.
        node: Node,
        /// Its input.
        input: Node,
    },
    /// A `TimestampPop` must read from a child of its own scope.
    #[error("timestamp pop {node:?} must read from a direct child scope of its own")]
    PopInputNotChild {
        /// The pop node.
        node: Node,
        /// Its input.
        input: Node,
    },
    /// Any other operator must not cross scopes.
    #[error("node {node:?} and its input {input:?} live in different scopes")]
    ScopeMismatch {
        /// The offending node.
        node: Node,
        /// Its input.
        input: Node,
    },
    /// Inputs live in the root scope, where timestamps are totally ordered;
    /// nested scopes are entered through `TimestampPush` only.
    #[error("input {node:?} must live in the root subgraph")]
    InputNotInRoot {
        /// The input node.
        node: Node,
    },
}

/// Builds a [`Graph`] one subgraph and node at a time.
pub struct GraphBuilder {
    node_specs: Vec<NodeSpec>,
    node_subgraphs: Vec<Subgraph>,
    subgraph_parents: Vec<Subgraph>,
}

impl GraphBuilder {
    /// A builder holding only the root subgraph.
    pub fn new() -> Self {
        GraphBuilder {
            node_specs: Vec::new(),
            node_subgraphs: Vec::new(),
            subgraph_parents: vec![Subgraph::ROOT],
        }
    }

    /// Opens a nested scope under `parent`.
    pub fn add_subgraph(&mut self, parent: Subgraph) -> Subgraph {
        assert!(
            parent.index() < self.subgraph_parents.len(),
            "parent subgraph {:?} does not exist",
            parent
        );
        let subgraph = Subgraph(self.subgraph_parents.len());
        self.subgraph_parents.push(parent);
        subgraph
    }

    /// Adds a node to `subgraph`, returning its identity.
    pub fn add_node(&mut self, subgraph: Subgraph, spec: NodeSpec) -> Node {
        assert!(
            subgraph.index() < self.subgraph_parents.len(),
            "subgraph {:?} does not exist",
            subgraph
        );
        let node = Node(self.node_specs.len());
        self.node_specs.push(spec);
        self.node_subgraphs.push(subgraph);
        node
    }

    /// Closes a loop: makes `from` the late-bound input of the
    /// `TimestampIncrement` node `loop_node`.
    pub fn connect_loop(&mut self, from: Node, loop_node: Node) {
        match &mut self.node_specs[loop_node.index()] {
            NodeSpec::TimestampIncrement { input } => *input = Some(from),
            other => panic!(
                "connected a loop into {:?}, which is a {} rather than a TimestampIncrement",
                loop_node,
                other.name()
            ),
        }
    }

    /// Freezes and validates the graph.
    pub fn finish(self) -> Result<Graph, GraphError> {
        let GraphBuilder {
            node_specs,
            node_subgraphs,
            subgraph_parents,
        } = self;

        // Scope paths, root first.
        let scope_path_of = |subgraph: Subgraph| {
            let mut path = vec![subgraph];
            while path.last() != Some(&Subgraph::ROOT) {
                path.push(subgraph_parents[path.last().unwrap().index()]);
            }
            path.reverse();
            path
        };
        let node_scope_paths: Vec<Vec<Subgraph>> = node_subgraphs
            .iter()
            .map(|subgraph| scope_path_of(*subgraph))
            .collect();

        // Existence and edge-direction checks, then per-operator scoping.
        for (index, spec) in node_specs.iter().enumerate() {
            let node = Node(index);
            if let NodeSpec::TimestampIncrement { input } = spec {
                let Some(input) = *input else {
                    return Err(GraphError::LoopNotConnected { node });
                };
                if input.index() >= node_specs.len() {
                    return Err(GraphError::UndefinedInput { node, input });
                }
                if input <= node {
                    return Err(GraphError::LoopInputNotLater { node, input });
                }
            } else {
                for input in spec.inputs() {
                    if input.index() >= node_specs.len() {
                        return Err(GraphError::UndefinedInput { node, input });
                    }
                    if input >= node {
                        return Err(GraphError::InputNotEarlier { node, input });
                    }
                }
            }

            match spec {
                NodeSpec::Join { inputs, .. } => {
                    for input in inputs {
                        if !node_specs[input.index()].is_indexable() {
                            return Err(GraphError::InputNotIndexable {
                                node,
                                input: *input,
                            });
                        }
                    }
                }
                NodeSpec::Distinct { input } => {
                    if !node_specs[input.index()].is_indexable() {
                        return Err(GraphError::InputNotIndexable {
                            node,
                            input: *input,
                        });
                    }
                }
                #[cfg(feature = "reduce")]
                NodeSpec::Reduce { input, .. } => {
                    if !node_specs[input.index()].is_indexable() {
                        return Err(GraphError::InputNotIndexable {
                            node,
                            input: *input,
                        });
                    }
                }
                _ => {}
            }
        }

        // Scope relations: push descends one level, pop ascends one level,
        // everything else stays put.
        for (index, spec) in node_specs.iter().enumerate() {
            let node = Node(index);
            let subgraph = node_subgraphs[index];
            match spec {
                NodeSpec::Input => {
                    if subgraph != Subgraph::ROOT {
                        return Err(GraphError::InputNotInRoot { node });
                    }
                }
                NodeSpec::TimestampPush { input } => {
                    let expected_parent = node_subgraphs[input.index()];
                    if subgraph == Subgraph::ROOT
                        || subgraph_parents[subgraph.index()] != expected_parent
                    {
                        return Err(GraphError::PushInputNotParent {
                            node,
                            input: *input,
                        });
                    }
                }
                NodeSpec::TimestampPop { input } => {
                    let input_subgraph = node_subgraphs[input.index()];
                    if input_subgraph == Subgraph::ROOT
                        || subgraph_parents[input_subgraph.index()] != subgraph
                    {
                        return Err(GraphError::PopInputNotChild {
                            node,
                            input: *input,
                        });
                    }
                }
                other => {
                    for input in other.inputs() {
                        if node_subgraphs[input.index()] != subgraph {
                            return Err(GraphError::ScopeMismatch { node, input });
                        }
                    }
                }
            }
        }

        // Downstream edges, indexed by the upstream node.
        let mut downstream_node_inputs: Vec<Vec<NodeInput>> = vec![Vec::new(); node_specs.len()];
        for (index, spec) in node_specs.iter().enumerate() {
            for (port, input) in spec.inputs().into_iter().enumerate() {
                downstream_node_inputs[input.index()].push(NodeInput {
                    node: Node(index),
                    port,
                });
            }
        }

        debug!(
            "froze dataflow graph: {} nodes in {} subgraphs",
            node_specs.len(),
            subgraph_parents.len()
        );

        Ok(Graph {
            node_specs,
            node_subgraphs,
            subgraph_parents,
            node_scope_paths,
            downstream_node_inputs,
        })
    }
}

/// A frozen, validated dataflow graph.
#[derive(Debug)]
pub struct Graph {
    node_specs: Vec<NodeSpec>,
    node_subgraphs: Vec<Subgraph>,
    subgraph_parents: Vec<Subgraph>,
    node_scope_paths: Vec<Vec<Subgraph>>,
    downstream_node_inputs: Vec<Vec<NodeInput>>,
}

impl Graph {
    /// The number of nodes.
    pub fn len(&self) -> usize {
        self.node_specs.len()
    }

    /// True iff the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.node_specs.is_empty()
    }

    /// Iterates over all node identities.
    pub fn nodes(&self) -> impl Iterator<Item = Node> {
        (0..self.node_specs.len()).map(Node)
    }

    /// What `node` computes.
    pub fn node_spec(&self, node: Node) -> &NodeSpec {
        &self.node_specs[node.index()]
    }

    /// The subgraph `node` lives in.
    pub fn node_subgraph(&self, node: Node) -> Subgraph {
        self.node_subgraphs[node.index()]
    }

    /// The chain of subgraphs from the root to `node`'s subgraph.
    pub fn scope_path(&self, node: Node) -> &[Subgraph] {
        &self.node_scope_paths[node.index()]
    }

    /// The timestamp length for data at `node`: one coordinate per scope.
    pub fn timestamp_len(&self, node: Node) -> usize {
        self.node_scope_paths[node.index()].len()
    }

    /// The node inputs fed by `node`'s output.
    pub fn downstream(&self, node: Node) -> &[NodeInput] {
        &self.downstream_node_inputs[node.index()]
    }

    /// The upstream node feeding `input`.
    pub fn upstream(&self, input: NodeInput) -> Node {
        self.node_specs[input.node.index()].inputs()[input.port]
    }
}
