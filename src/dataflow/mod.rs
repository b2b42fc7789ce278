//! Graph construction and the executor.

pub mod graph;
pub mod shard;

pub use graph::{Graph, GraphBuilder, GraphError, MapLogic, Node, NodeInput, NodeSpec, Subgraph};
#[cfg(feature = "reduce")]
pub use graph::ReduceLogic;
pub use shard::{Shard, ShardError};
