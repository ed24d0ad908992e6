//! Reference hint generation for countable devices
//!
//! Devices (accelerators, NICs, anything a plugin enumerates) sit on specific
//! NUMA nodes, so a request for `k` of them constrains placement: a candidate
//! mask is only worth offering if enough devices are reachable from it. The
//! generator walks every placement mask in canonical order, counts the
//! devices each one reaches, and marks the masks on the minimum satisfying
//! cardinality as preferred.
//!
//! Re-admission is special-cased: a workload that already holds devices must
//! be re-aligned against exactly those devices, and a mismatch between the
//! held and requested counts poisons the resource with an empty hint list so
//! that the merge steers towards rejection.

use crate::{
    bitmask::BitMask,
    features,
    hint::TopologyHint,
    numa::{NumaInfo, LOCAL_DISTANCE},
};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Baseline bandwidth for node-local device access, GB/s
const LOCAL_BANDWIDTH: f64 = 80.0;

/// Fraction of bandwidth lost per interconnect hop
const BANDWIDTH_LOSS_PER_HOP: f64 = 0.4;

/// Floor below which estimated device bandwidth never drops, GB/s
const BANDWIDTH_FLOOR: f64 = 10.0;

/// Added distance per interconnect hop; device access is more sensitive to
/// distance than CPU access, hence the steep slope
const DISTANCE_PER_HOP: u32 = 20;

/// Score weight of the distance excess over local
const DISTANCE_WEIGHT: f64 = 2.0;

/// Score weight of each interconnect hop
const HOP_WEIGHT: f64 = 12.0;

/// Score credit for leaving devices unused in the chosen placement
const UTILIZATION_WEIGHT: f64 = 10.0;

/// Device inventory of one resource class, with per-device NUMA placement
///
/// # Examples
///
/// ```
/// use std::collections::HashSet;
/// use numalign::{BitMask, DeviceHintGenerator, NumaInfo};
///
/// let numa = NumaInfo::with_uniform_distance(&[0, 1], 11)?;
/// let mut devices = DeviceHintGenerator::new(&numa);
/// devices.add_device("gpu-0", Some(BitMask::from_nodes([0]).unwrap()));
/// devices.add_device("gpu-1", Some(BitMask::from_nodes([1]).unwrap()));
///
/// let available: HashSet<String> = ["gpu-0", "gpu-1"].iter().map(ToString::to_string).collect();
/// let hints = devices.generate_hints(1, &available, &HashSet::new());
/// // One device suffices, so both single-node placements are preferred
/// assert!(hints.iter().filter(|hint| hint.preferred).count() == 2);
/// # Ok::<(), numalign::ConfigurationError>(())
/// ```
pub struct DeviceHintGenerator<'numa> {
    /// Machine topology driving the mask enumeration
    numa: &'numa NumaInfo,

    /// Placement of every known device; `None` when the device reports no
    /// topology information
    devices: BTreeMap<String, Option<BitMask>>,
}

impl<'numa> DeviceHintGenerator<'numa> {
    /// Creates an empty inventory for one resource class
    pub fn new(numa: &'numa NumaInfo) -> Self {
        Self {
            numa,
            devices: BTreeMap::new(),
        }
    }

    /// Registers a device and the NUMA nodes it is attached to
    ///
    /// Pass `None` for devices that report no topology information; they
    /// never satisfy a placement mask but still exist for accounting.
    pub fn add_device(&mut self, id: impl Into<String>, topology: Option<BitMask>) {
        self.devices.insert(id.into(), topology);
    }

    /// Truth that any device of this resource carries topology information
    ///
    /// A resource where no device does should be reported as "don't care"
    /// rather than hinted, see [`ResourceHints`].
    ///
    /// [`ResourceHints`]: crate::provider::ResourceHints
    pub fn has_topology_alignment(&self) -> bool {
        self.devices.values().any(Option::is_some)
    }

    /// Generates the candidate placements for a request of `request` devices
    ///
    /// `available` holds the ids of healthy, unallocated devices;
    /// `reusable` holds devices carried over from a previous admission of
    /// the same workload, which every offered mask must cover.
    pub fn generate_hints(
        &self,
        request: usize,
        available: &HashSet<String>,
        reusable: &HashSet<String>,
    ) -> Vec<TopologyHint> {
        let mut min_affinity_size = self.numa.node_count();
        let mut hints = Vec::new();

        'masks: for mask in self.numa.enumerate_masks() {
            // Track the smallest mask that reaches enough devices at all,
            // allocated or not; that is the preference frontier
            let devices_in_mask = self.devices_intersecting(mask);
            if devices_in_mask >= request && mask.count() < min_affinity_size {
                min_affinity_size = mask.count();
            }

            // Every reusable device must be reachable from the mask, else the
            // mask cannot host this workload at all
            let mut matching = 0;
            for id in reusable {
                match self.devices.get(id).copied().flatten() {
                    // Devices without topology information cannot be placed
                    None => continue,
                    Some(topology) if !topology.intersects(mask) => continue 'masks,
                    Some(_) => matching += 1,
                }
            }

            for id in available {
                if self.device_intersects(id, mask) {
                    matching += 1;
                }
            }
            if matching < request {
                continue;
            }

            // Preferences are settled in a second pass, once the frontier is
            // known
            let mut hint = TopologyHint::new(mask, false);
            if features::enhanced_hints_enabled() {
                hint = self.attach_metrics(hint, mask, devices_in_mask, request);
            }
            hints.push(hint);
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

    /// Regenerates hints for a workload that already holds devices
    ///
    /// A held count that disagrees with the request cannot be aligned and
    /// yields an empty list; otherwise the held set alone drives generation.
    pub fn regenerate_hints(&self, request: usize, bound: &HashSet<String>) -> Vec<TopologyHint> {
        if bound.len() != request {
            warn!(
                bound = bound.len(),
                request, "workload already holds a different number of devices than requested",
            );
            return Vec::new();
        }
        debug!(request, "regenerating placement hints from held devices");
        self.generate_hints(request, bound, &HashSet::new())
    }

    /// Number of known devices whose topology intersects `mask`
    fn devices_intersecting(&self, mask: BitMask) -> usize {
        self.devices
            .values()
            .filter(|topology| topology.is_some_and(|nodes| nodes.intersects(mask)))
            .count()
    }

    /// Truth that the given device exists, has topology, and reaches `mask`
    fn device_intersects(&self, id: &str, mask: BitMask) -> bool {
        self.devices
            .get(id)
            .copied()
            .flatten()
            .is_some_and(|topology| topology.intersects(mask))
    }

    /// Decorates an emitted hint with the device interconnect model
    fn attach_metrics(
        &self,
        hint: TopologyHint,
        mask: BitMask,
        devices_in_mask: usize,
        request: usize,
    ) -> TopologyHint {
        let hop_count = mask.count().saturating_sub(1) as u32;
        let distance = LOCAL_DISTANCE as u32 + hop_count * DISTANCE_PER_HOP;
        let bandwidth =
            (LOCAL_BANDWIDTH * (1.0 - BANDWIDTH_LOSS_PER_HOP * f64::from(hop_count)))
                .max(BANDWIDTH_FLOOR);

        let utilization = if devices_in_mask == 0 {
            0.0
        } else {
            (request as f64 / devices_in_mask as f64).min(1.0)
        };
        let score = (DISTANCE_WEIGHT * f64::from(distance - LOCAL_DISTANCE as u32)
            + HOP_WEIGHT * f64::from(hop_count)
            - UTILIZATION_WEIGHT * (1.0 - utilization))
            .max(0.0);

        hint.with_metrics(hop_count, bandwidth, distance, score)
    }
}
