//! NUMA topology description
//!
//! [`NumaInfo`] is the immutable picture of the machine that a policy is
//! constructed against: which NUMA nodes exist and how far apart they are.
//! Distances follow the Linux kernel convention where a node is at distance
//! 10 from itself and at least 10 from everything else. Topology discovery
//! itself happens elsewhere in the host; this module only validates and
//! serves what it is handed.

use crate::{
    bitmask::{BitMask, MaskEnumerator},
    errors::ConfigurationError,
};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;

/// Identifier of a NUMA node, as reported by the operating system
pub type NodeId = usize;

/// Distance from a node to itself, per the kernel convention
pub const LOCAL_DISTANCE: u64 = 10;

/// One NUMA node as handed over by topology discovery
///
/// `distances` holds the distance from this node to every node of the
/// machine, indexed by position in the ascending-id node order that
/// [`NumaInfo::new()`] establishes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NumaNode {
    /// OS identifier of the node
    pub id: NodeId,

    /// Distance from this node to each node of the machine
    pub distances: Vec<u64>,
}

/// Validated NUMA node list and distance matrix
///
/// Built once per policy instance and treated as immutable afterwards. The
/// node list is kept sorted ascending, which is also the order in which
/// [`NumaInfo::enumerate_masks()`] walks candidate placements.
///
/// # Examples
///
/// ```
/// use numalign::{NumaInfo, NumaNode};
///
/// let numa = NumaInfo::new(vec![
///     NumaNode { id: 0, distances: vec![10, 11] },
///     NumaNode { id: 1, distances: vec![11, 10] },
/// ])?;
/// assert_eq!(numa.default_affinity_mask().to_string(), "0-1");
/// assert_eq!(numa.distance(0, 1), Some(11));
/// # Ok::<(), numalign::ConfigurationError>(())
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NumaInfo {
    /// Node identifiers, ascending
    nodes: Vec<NodeId>,

    /// Distance matrix, `rows[i][j]` = distance from `nodes[i]` to `nodes[j]`
    rows: Vec<Vec<u64>>,
}

impl NumaInfo {
    /// Validates a discovered topology
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::InvalidNumaTopology`] if the node list is empty,
    /// contains duplicate or unrepresentable identifiers, or if the distance
    /// matrix is not a symmetric NxN table following the kernel convention
    /// (self-distance 10, cross-node distances at least 10).
    pub fn new(mut nodes: Vec<NumaNode>) -> Result<Self, ConfigurationError> {
        let invalid = |message: String| ConfigurationError::InvalidNumaTopology(message);

        if nodes.is_empty() {
            return Err(invalid("machine reports no NUMA nodes".into()));
        }
        nodes.sort_by_key(|node| node.id);
        for pair in nodes.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(invalid(format!("duplicate NUMA node id {}", pair[0].id)));
            }
        }
        if let Some(node) = nodes.iter().find(|node| node.id > BitMask::MAX_INDEX) {
            return Err(invalid(format!(
                "NUMA node id {} exceeds the supported maximum {}",
                node.id,
                BitMask::MAX_INDEX,
            )));
        }

        let count = nodes.len();
        for (i, node) in nodes.iter().enumerate() {
            if node.distances.len() != count {
                return Err(invalid(format!(
                    "node {} has {} distance entries, expected {count}",
                    node.id,
                    node.distances.len(),
                )));
            }
            if node.distances[i] != LOCAL_DISTANCE {
                return Err(invalid(format!(
                    "node {} has self-distance {}, expected {LOCAL_DISTANCE}",
                    node.id, node.distances[i],
                )));
            }
            if let Some(&short) = node.distances.iter().find(|&&d| d < LOCAL_DISTANCE) {
                return Err(invalid(format!(
                    "node {} has distance {short} below the local distance {LOCAL_DISTANCE}",
                    node.id,
                )));
            }
        }
        for i in 0..count {
            for j in i + 1..count {
                if nodes[i].distances[j] != nodes[j].distances[i] {
                    return Err(invalid(format!(
                        "asymmetric distances between nodes {} and {}",
                        nodes[i].id, nodes[j].id,
                    )));
                }
            }
        }

        Ok(Self {
            nodes: nodes.iter().map(|node| node.id).collect(),
            rows: nodes.into_iter().map(|node| node.distances).collect(),
        })
    }

    /// Shorthand for a machine where every pair of distinct nodes is at the
    /// same distance
    ///
    /// Convenient for synthetic topologies in tests and examples.
    ///
    /// # Errors
    ///
    /// Same as [`NumaInfo::new()`].
    pub fn with_uniform_distance(
        nodes: &[NodeId],
        remote_distance: u64,
    ) -> Result<Self, ConfigurationError> {
        Self::new(
            nodes
                .iter()
                .map(|&id| NumaNode {
                    id,
                    distances: nodes
                        .iter()
                        .map(|&other| {
                            if other == id {
                                LOCAL_DISTANCE
                            } else {
                                remote_distance
                            }
                        })
                        .collect(),
                })
                .collect(),
        )
    }

    /// Node identifiers in ascending order
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Number of NUMA nodes on the machine
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Mask with every node of the machine set
    ///
    /// This is the "any placement will do" affinity that don't-care hints
    /// contribute to a merge, and the seed that merging starts from.
    pub fn default_affinity_mask(&self) -> BitMask {
        BitMask::from_validated_nodes(self.nodes.iter().copied())
    }

    /// Distance between two nodes, `None` if either is unknown
    pub fn distance(&self, a: NodeId, b: NodeId) -> Option<u64> {
        let row = self.nodes.iter().position(|&id| id == a)?;
        let col = self.nodes.iter().position(|&id| id == b)?;
        Some(self.rows[row][col])
    }

    /// Enumerates every candidate placement mask over this machine's nodes
    ///
    /// See [`MaskEnumerator`] for the ordering guarantees.
    pub fn enumerate_masks(&self) -> MaskEnumerator<'_> {
        MaskEnumerator::new_validated(&self.nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    fn two_nodes() -> NumaInfo {
        NumaInfo::new(vec![
            NumaNode {
                id: 0,
                distances: vec![10, 11],
            },
            NumaNode {
                id: 1,
                distances: vec![11, 10],
            },
        ])
        .unwrap()
    }

    #[test]
    fn accessors() {
        let numa = two_nodes();
        assert_eq!(numa.nodes(), &[0, 1]);
        assert_eq!(numa.node_count(), 2);
        assert_eq!(numa.default_affinity_mask().to_string(), "0-1");
        assert_eq!(numa.distance(0, 0), Some(10));
        assert_eq!(numa.distance(0, 1), Some(11));
        assert_eq!(numa.distance(1, 7), None);
    }

    #[test]
    fn nodes_are_sorted() {
        let numa = NumaInfo::new(vec![
            NumaNode {
                id: 2,
                distances: vec![10, 20],
            },
            NumaNode {
                id: 1,
                distances: vec![20, 10],
            },
        ])
        .unwrap();
        // Rows follow the sorted order, so node 1 comes first
        assert_eq!(numa.nodes(), &[1, 2]);
        assert_eq!(numa.distance(1, 1), Some(10));
        assert_eq!(numa.distance(1, 2), Some(20));
    }

    #[test]
    fn uniform_distance() {
        let numa = NumaInfo::with_uniform_distance(&[0, 1, 2, 3], 20).unwrap();
        assert_eq!(numa.node_count(), 4);
        assert_eq!(numa.distance(1, 1), Some(10));
        assert_eq!(numa.distance(0, 3), Some(20));
    }

    #[test]
    fn rejects_malformed_topologies() {
        let errors = [
            NumaInfo::new(vec![]),
            NumaInfo::new(vec![
                NumaNode {
                    id: 0,
                    distances: vec![10, 11],
                },
                NumaNode {
                    id: 0,
                    distances: vec![11, 10],
                },
            ]),
            NumaInfo::new(vec![NumaNode {
                id: 64,
                distances: vec![10],
            }]),
            NumaInfo::new(vec![NumaNode {
                id: 0,
                distances: vec![10, 11],
            }]),
            NumaInfo::new(vec![NumaNode {
                id: 0,
                distances: vec![11],
            }]),
            NumaInfo::new(vec![
                NumaNode {
                    id: 0,
                    distances: vec![10, 11],
                },
                NumaNode {
                    id: 1,
                    distances: vec![12, 10],
                },
            ]),
            NumaInfo::new(vec![
                NumaNode {
                    id: 0,
                    distances: vec![10, 9],
                },
                NumaNode {
                    id: 1,
                    distances: vec![9, 10],
                },
            ]),
        ];
        for result in errors {
            assert!(matches!(
                result,
                Err(ConfigurationError::InvalidNumaTopology(_)),
            ));
        }
    }

    #[test]
    fn mask_enumeration_covers_machine() {
        let numa = two_nodes();
        let masks: Vec<String> = numa
            .enumerate_masks()
            .map(|mask| mask.to_string())
            .collect();
        assert_eq!(masks, ["0", "1", "0-1"]);
    }
}
