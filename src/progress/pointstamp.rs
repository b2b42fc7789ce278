//! Pointstamps: the atoms of progress tracking.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::dataflow::{NodeInput, Subgraph};
use crate::progress::Timestamp;

/// A timestamp bound for a location in the graph: work at this node input,
/// at this time, may still produce effects.
///
/// The scope path is that of the emitting node, so its length always equals
/// the timestamp length. The `Ord` implementation is the could-result-in
/// order: the order in which pointstamp effects must be propagated so that
/// frontier advancement remains sound across feedback edges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pointstamp {
    /// The node input the effect is destined for.
    pub location: NodeInput,
    /// The scope path of the emitting node, root first.
    pub subgraphs: Vec<Subgraph>,
    /// The time of the effect, one coordinate per scope on the path.
    pub timestamp: Timestamp,
}

impl Pointstamp {
    /// Assembles a pointstamp, checking the path/timestamp agreement.
    pub fn new(location: NodeInput, subgraphs: Vec<Subgraph>, timestamp: Timestamp) -> Self {
        assert_eq!(
            subgraphs.len(),
            timestamp.len(),
            "pointstamp scope path and timestamp disagree on depth"
        );
        Pointstamp {
            location,
            subgraphs,
            timestamp,
        }
    }
}

impl PartialOrd for Pointstamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pointstamp {
    /// Walk the shared prefix of scope paths; at each depth the subgraph id
    /// decides first, then the timestamp coordinate at that depth. When one
    /// path is a prefix of the other the inner timestamp can influence the
    /// outer, so the tie falls through to node id and input port.
    fn cmp(&self, other: &Self) -> Ordering {
        let depth = std::cmp::min(self.subgraphs.len(), other.subgraphs.len());
        for level in 0..depth {
            let by_scope = self.subgraphs[level].cmp(&other.subgraphs[level]);
            if by_scope != Ordering::Equal {
                return by_scope;
            }
            let by_coord = self.timestamp.coords()[level].cmp(&other.timestamp.coords()[level]);
            if by_coord != Ordering::Equal {
                return by_coord;
            }
        }
        self.location
            .node
            .cmp(&other.location.node)
            .then(self.location.port.cmp(&other.location.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::Node;

    fn pointstamp(node: usize, port: usize, path: &[usize], coords: &[u64]) -> Pointstamp {
        Pointstamp::new(
            NodeInput {
                node: Node::from_index(node),
                port,
            },
            path.iter().copied().map(Subgraph::from_index).collect(),
            Timestamp::new(coords.to_vec()),
        )
    }

    #[test]
    fn outer_coordinates_dominate_inner_ones() {
        // A later outer time exceeds any inner time at an earlier outer time.
        let early = pointstamp(7, 0, &[0, 1], &[0, 9]);
        let late = pointstamp(2, 0, &[0, 1], &[1, 0]);
        assert!(early < late);
    }

    #[test]
    fn prefix_paths_fall_through_to_node_order() {
        // Same outer coordinate: the shallower pointstamp is ordered by node.
        let outer = pointstamp(3, 0, &[0], &[0]);
        let inner = pointstamp(5, 1, &[0, 1], &[0, 4]);
        assert!(outer < inner);
        assert!(inner > outer);
    }

    #[test]
    fn sibling_scopes_order_by_subgraph_id() {
        let left = pointstamp(4, 0, &[0, 1], &[0, 9]);
        let right = pointstamp(4, 0, &[0, 2], &[0, 0]);
        assert!(left < right);
    }

    #[test]
    #[should_panic(expected = "disagree on depth")]
    fn mismatched_depth_panics() {
        let _ = pointstamp(0, 0, &[0, 1], &[0]);
    }
}
