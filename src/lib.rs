//! Rill is an incremental, timestamped dataflow engine for a single worker.
//!
//! Programs are written as dataflow graphs over multisets of rows: inputs
//! feed operators like `map`, `join`, and `distinct`, and nested scopes
//! express iteration through feedback edges. Having built a graph, you push
//! insertions and retractions at logical timestamps, and the engine emits
//! compact change batches describing how every output evolves, valid at
//! every timestamp, including inside loops.
//!
//! The engine is cooperative and single-threaded: a [`Shard`] owns all
//! mutable state, and [`Shard::do_work`] takes one step at a time, routing
//! change batches and propagating progress information until the computation
//! settles. Progress tracking is what lets a stateful operator inside a
//! cycle learn that a timestamp can no longer change, so that iterative
//! computations terminate.
//!
//! # Example
//!
//! ```
//! use rill::{GraphBuilder, InputSession, NodeSpec, Row, Shard, Subgraph, Timestamp, Value};
//!
//! // A graph that indexes its input and queues it at an output.
//! let mut builder = GraphBuilder::new();
//! let edges = builder.add_node(Subgraph::ROOT, NodeSpec::Input);
//! let index = builder.add_node(Subgraph::ROOT, NodeSpec::Index { input: edges });
//! let output = builder.add_node(Subgraph::ROOT, NodeSpec::Output { input: index });
//! let graph = builder.finish().unwrap();
//!
//! let mut shard = Shard::new(graph);
//! {
//!     let mut session = InputSession::new(&mut shard, edges);
//!     session.insert(Row::new(vec![Value::from("a"), Value::from("b")]));
//!     session.advance_to(Timestamp::new(vec![1]));
//! }
//! while shard.has_work() {
//!     shard.do_work();
//! }
//! assert!(shard.pop_output(output).is_some());
//! ```

pub mod collection;
pub mod data;
pub mod dataflow;
pub mod input;
pub mod lattice;
pub mod logging;
pub mod order;
pub mod progress;

pub use collection::{Bag, Change, ChangeBatch, ChangeBatchBuilder, Index};
pub use data::{Data, Diff, Row, Value};
pub use dataflow::{
    Graph, GraphBuilder, GraphError, Node, NodeInput, NodeSpec, Shard, ShardError, Subgraph,
};
pub use input::InputSession;
pub use lattice::Lattice;
pub use logging::{DebugEvent, EventRecorder, Observer};
pub use order::PartialOrder;
pub use progress::{Frontier, Pointstamp, SupportedFrontier, Timestamp};
