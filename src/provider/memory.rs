//! Reference hint generation for byte-granular memory
//!
//! Memory differs from devices in that capacity pools, it does not count: a
//! placement mask is viable when the free bytes of the nodes it covers add up
//! to the request. The enumeration and preference-frontier logic are the same
//! as on the device side, while the interconnect model uses its own
//! constants: memory traffic degrades more gently across hops than device
//! traffic does, so the distance slope and bandwidth loss are shallower.

use crate::{
    bitmask::BitMask,
    features,
    hint::TopologyHint,
    numa::{NodeId, NumaInfo, LOCAL_DISTANCE},
};
use std::collections::BTreeMap;
use tracing::debug;

/// Baseline bandwidth for node-local memory access, GB/s
const LOCAL_BANDWIDTH: f64 = 100.0;

/// Fraction of bandwidth lost per interconnect hop
const BANDWIDTH_LOSS_PER_HOP: f64 = 0.3;

/// Floor below which estimated memory bandwidth never drops, GB/s
const BANDWIDTH_FLOOR: f64 = 10.0;

/// Added distance per interconnect hop
const DISTANCE_PER_HOP: u32 = 15;

/// Score weight of the distance excess over local
const DISTANCE_WEIGHT: f64 = 1.5;

/// Score weight of each interconnect hop
const HOP_WEIGHT: f64 = 8.0;

/// Score credit for leaving capacity free in the chosen placement
const UTILIZATION_WEIGHT: f64 = 10.0;

/// Free-memory bookkeeping for one machine, by NUMA node
///
/// # Examples
///
/// ```
/// use numalign::{MemoryHintGenerator, NumaInfo};
///
/// let numa = NumaInfo::with_uniform_distance(&[0, 1], 11)?;
/// let mut memory = MemoryHintGenerator::new(&numa);
/// memory.set_free_capacity(0, 2 << 30);
/// memory.set_free_capacity(1, 2 << 30);
///
/// // 1 GiB fits on either node alone
/// let hints = memory.generate_hints(1 << 30);
/// assert_eq!(hints.iter().filter(|hint| hint.preferred).count(), 2);
///
/// // 3 GiB needs both nodes
/// let hints = memory.generate_hints(3 << 30);
/// assert_eq!(hints.len(), 1);
/// # Ok::<(), numalign::ConfigurationError>(())
/// ```
pub struct MemoryHintGenerator<'numa> {
    /// Machine topology driving the mask enumeration
    numa: &'numa NumaInfo,

    /// Free bytes per node; nodes without an entry have none to give
    free_bytes: BTreeMap<NodeId, u64>,
}

impl<'numa> MemoryHintGenerator<'numa> {
    /// Creates a generator with no free capacity recorded
    pub fn new(numa: &'numa NumaInfo) -> Self {
        Self {
            numa,
            free_bytes: BTreeMap::new(),
        }
    }

    /// Records the free capacity of one node
    ///
    /// Entries for nodes unknown to the machine topology are kept but never
    /// consulted.
    pub fn set_free_capacity(&mut self, node: NodeId, bytes: u64) {
        self.free_bytes.insert(node, bytes);
    }

    /// Generates the candidate placements for a request of `requested` bytes
    pub fn generate_hints(&self, requested: u64) -> Vec<TopologyHint> {
        let mut min_affinity_size = self.numa.node_count();
        let mut hints = Vec::new();

        for mask in self.numa.enumerate_masks() {
            let capacity = self.capacity_in(mask);
            if capacity < requested {
                continue;
            }
            if mask.count() < min_affinity_size {
                min_affinity_size = mask.count();
            }

            let mut hint = TopologyHint::new(mask, false);
            if features::enhanced_hints_enabled() {
                hint = self.attach_metrics(hint, mask, capacity, requested);
            }
            hints.push(hint);
        }

        if hints.is_empty() {
            debug!(requested, "memory request exceeds every placement's free capacity");
        }
        for hint in &mut hints {
            let on_frontier = hint
                .numa_affinity
                .is_some_and(|mask| mask.count() == min_affinity_size);
            if on_frontier {
                hint.preferred = true;
            }
        }
        hints
    }

    /// Free bytes across the nodes of `mask`
    fn capacity_in(&self, mask: BitMask) -> u64 {
        mask.iter_set()
            .map(|node| self.free_bytes.get(&node).copied().unwrap_or(0))
            .sum()
    }

    /// Decorates an emitted hint with the memory interconnect model
    fn attach_metrics(
        &self,
        hint: TopologyHint,
        mask: BitMask,
        capacity: u64,
        requested: u64,
    ) -> TopologyHint {
        let hop_count = mask.count().saturating_sub(1) as u32;
        let distance = LOCAL_DISTANCE as u32 + hop_count * DISTANCE_PER_HOP;
        let bandwidth =
            (LOCAL_BANDWIDTH * (1.0 - BANDWIDTH_LOSS_PER_HOP * f64::from(hop_count)))
                .max(BANDWIDTH_FLOOR);

        let utilization = if capacity == 0 {
            0.0
        } else {
            (requested as f64 / capacity as f64).min(1.0)
        };
        let score = (DISTANCE_WEIGHT * f64::from(distance - LOCAL_DISTANCE as u32)
            + HOP_WEIGHT * f64::from(hop_count)
            - UTILIZATION_WEIGHT * (1.0 - utilization))
            .max(0.0);

        hint.with_metrics(hop_count, bandwidth, distance, score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::with_enhanced_hints;
    use similar_asserts::assert_eq;

    const GIB: u64 = 1 << 30;

    fn mask(nodes: impl IntoIterator<Item = usize>) -> BitMask {
        BitMask::from_nodes(nodes).unwrap()
    }

    fn gib_per_node(numa: &NumaInfo, gib: u64) -> MemoryHintGenerator<'_> {
        let mut memory = MemoryHintGenerator::new(numa);
        for &node in numa.nodes() {
            memory.set_free_capacity(node, gib * GIB);
        }
        memory
    }

    #[test]
    fn local_fit_prefers_single_nodes() {
        let numa = NumaInfo::with_uniform_distance(&[0, 1], 11).unwrap();
        let memory = gib_per_node(&numa, 2);
        let hints = with_enhanced_hints(false, || memory.generate_hints(GIB));
        assert_eq!(
            hints,
            vec![
                TopologyHint::new(mask([0]), true),
                TopologyHint::new(mask([1]), true),
                TopologyHint::new(mask([0, 1]), false),
            ],
        );
    }

    #[test]
    fn spill_over_request_prefers_the_pair() {
        let numa = NumaInfo::with_uniform_distance(&[0, 1], 11).unwrap();
        let memory = gib_per_node(&numa, 2);
        let hints = with_enhanced_hints(false, || memory.generate_hints(3 * GIB));
        assert_eq!(hints, vec![TopologyHint::new(mask([0, 1]), true)]);
    }

    #[test]
    fn oversized_request_yields_nothing() {
        let numa = NumaInfo::with_uniform_distance(&[0, 1], 11).unwrap();
        let memory = gib_per_node(&numa, 2);
        assert_eq!(
            with_enhanced_hints(false, || memory.generate_hints(5 * GIB)),
            vec![],
        );
    }

    #[test]
    fn unknown_nodes_have_no_capacity() {
        let numa = NumaInfo::with_uniform_distance(&[0, 1], 11).unwrap();
        let mut memory = MemoryHintGenerator::new(&numa);
        memory.set_free_capacity(0, 2 * GIB);
        // Node 7 is not part of the machine, its capacity never counts
        memory.set_free_capacity(7, 64 * GIB);

        let hints = with_enhanced_hints(false, || memory.generate_hints(GIB));
        assert_eq!(
            hints,
            vec![
                TopologyHint::new(mask([0]), true),
                TopologyHint::new(mask([0, 1]), false),
            ],
        );
    }

    #[test]
    fn memory_interconnect_model() {
        let numa = NumaInfo::with_uniform_distance(&[0, 1, 2], 20).unwrap();
        let memory = gib_per_node(&numa, 1);
        let hints = with_enhanced_hints(true, || memory.generate_hints(2 * GIB));

        let pair = hints
            .iter()
            .find(|hint| hint.numa_affinity == Some(mask([0, 1])))
            .unwrap();
        assert!(pair.preferred);
        assert_eq!(pair.hop_count, Some(1));
        assert_eq!(pair.distance, Some(25));
        assert_eq!(pair.bandwidth, Some(70.0));
        // The pair is fully used: 1.5 * 15 + 8, no utilization credit
        assert_eq!(pair.score, Some(1.5 * 15.0 + 8.0));

        let triple = hints
            .iter()
            .find(|hint| hint.numa_affinity == Some(mask([0, 1, 2])))
            .unwrap();
        assert!(!triple.preferred);
        assert_eq!(triple.hop_count, Some(2));
        assert_eq!(triple.distance, Some(40));
        assert_eq!(triple.bandwidth, Some(40.0));
    }

    #[test]
    fn metrics_absent_when_disabled() {
        let numa = NumaInfo::with_uniform_distance(&[0, 1], 11).unwrap();
        let memory = gib_per_node(&numa, 2);
        let hints = with_enhanced_hints(false, || memory.generate_hints(GIB));
        assert!(hints.iter().all(|hint| !hint.has_metrics()));
    }
}
