//! Topology hints and their ranking
//!
//! A [`TopologyHint`] is a provider's statement that one candidate placement
//! can satisfy its share of a resource request. Hints are ranked with
//! [`TopologyHint::less_than()`] during merging, where "less" means "a better
//! consensus candidate": preferred placements first, then (with enhanced
//! metrics enabled) better interconnect characteristics, then narrower
//! placements.
//!
//! The four interconnect metric fields are independently optional. They are
//! only populated while the process-wide toggle of [`crate::features`] is on,
//! and every read through the `effective_*` accessors degrades to the
//! documented defaults when the toggle is off or the field is absent. Note
//! that the absent-distance default is the local distance 10, not 0; callers
//! compare distances against the kernel convention without checking presence
//! first.

use crate::{
    bitmask::BitMask,
    features,
    numa::LOCAL_DISTANCE,
};
#[cfg(any(test, feature = "proptest"))]
use proptest::prelude::*;
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;

/// Distance reported for an absent distance field, as `u32`
const LOCAL_DISTANCE_U32: u32 = LOCAL_DISTANCE as u32;

/// One candidate placement for one resource request
///
/// `numa_affinity == None` is the "don't care" hint: the provider can satisfy
/// the request on any placement, so the hint contributes the machine's
/// default affinity mask to a merge. Don't-care hints carry no metrics.
///
/// Equality compares every present field and treats two absent fields as
/// equal; a present and an absent field never compare equal.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TopologyHint {
    /// Candidate placement, `None` for "don't care"
    pub numa_affinity: Option<BitMask>,

    /// Truth that this placement is on the provider's preferred frontier,
    /// i.e. on the minimum cardinality that still satisfies the request
    pub preferred: bool,

    /// Interconnect hops to reach the resource, lower is better
    pub hop_count: Option<u32>,

    /// Interconnect bandwidth in GB/s, higher is better
    pub bandwidth: Option<f64>,

    /// Kernel-convention NUMA distance (10 = local), lower is better
    pub distance: Option<u32>,

    /// Combined placement score, lower is better
    pub score: Option<f64>,
}

impl TopologyHint {
    /// Hint for a concrete placement, without metrics
    pub fn new(numa_affinity: BitMask, preferred: bool) -> Self {
        Self {
            numa_affinity: Some(numa_affinity),
            preferred,
            ..Self::default()
        }
    }

    /// Hint with no placement preference
    pub fn dont_care(preferred: bool) -> Self {
        Self {
            preferred,
            ..Self::default()
        }
    }

    /// Attaches interconnect metrics to the hint
    ///
    /// Does nothing unless enhanced metrics are enabled process-wide and the
    /// hint has a concrete placement; a don't-care hint never carries
    /// metrics.
    ///
    /// # Examples
    ///
    /// ```
    /// use numalign::{features, BitMask, TopologyHint};
    ///
    /// let mask = BitMask::from_nodes([0])?;
    /// features::with_enhanced_hints(false, || {
    ///     let hint = TopologyHint::new(mask, true).with_metrics(0, 80.0, 10, 5.0);
    ///     assert!(!hint.has_metrics());
    /// });
    /// features::with_enhanced_hints(true, || {
    ///     let hint = TopologyHint::new(mask, true).with_metrics(0, 80.0, 10, 5.0);
    ///     assert_eq!(hint.distance, Some(10));
    /// });
    /// # Ok::<(), numalign::NodeOutOfRange>(())
    /// ```
    #[must_use]
    pub fn with_metrics(mut self, hop_count: u32, bandwidth: f64, distance: u32, score: f64) -> Self {
        if !features::enhanced_hints_enabled() || self.numa_affinity.is_none() {
            return self;
        }
        self.hop_count = Some(hop_count);
        self.bandwidth = Some(bandwidth);
        self.distance = Some(distance);
        self.score = Some(score);
        self
    }

    /// Truth that any metric field is present
    pub fn has_metrics(&self) -> bool {
        self.hop_count.is_some()
            || self.bandwidth.is_some()
            || self.distance.is_some()
            || self.score.is_some()
    }

    // === Toggle-aware metric reads ===

    /// Hop count, 0 when absent or when enhanced metrics are disabled
    pub fn effective_hop_count(&self) -> u32 {
        if !features::enhanced_hints_enabled() {
            return 0;
        }
        self.hop_count.unwrap_or(0)
    }

    /// Bandwidth in GB/s, 0.0 when absent or when enhanced metrics are
    /// disabled
    pub fn effective_bandwidth(&self) -> f64 {
        if !features::enhanced_hints_enabled() {
            return 0.0;
        }
        self.bandwidth.unwrap_or(0.0)
    }

    /// Distance, falling back to the local distance 10 when absent or when
    /// enhanced metrics are disabled
    ///
    /// The fallback is deliberately the kernel's local distance rather than
    /// zero, so that distance thresholds keep working for callers that do not
    /// check presence.
    pub fn effective_distance(&self) -> u32 {
        if !features::enhanced_hints_enabled() {
            return LOCAL_DISTANCE_U32;
        }
        self.distance.unwrap_or(LOCAL_DISTANCE_U32)
    }

    /// Placement score, 0.0 when absent or when enhanced metrics are
    /// disabled
    pub fn effective_score(&self) -> f64 {
        if !features::enhanced_hints_enabled() {
            return 0.0;
        }
        self.score.unwrap_or(0.0)
    }

    // === Ranking ===

    /// Truth that `self` is a better consensus candidate than `other`
    ///
    /// The ordering is strict: for any two hints at most one direction holds.
    ///
    /// 1. A preferred hint precedes a non-preferred one.
    /// 2. With `enhanced` set and metrics present on either side: lower score
    ///    first (a scored hint beats an unscored one), then lower hop count,
    ///    then lower distance, then higher bandwidth; the latter three only
    ///    discriminate when both sides carry the field.
    /// 3. Otherwise the narrower placement wins; a concrete placement is
    ///    narrower than a don't-care.
    ///
    /// `enhanced` is the caller's snapshot of the process-wide toggle, taken
    /// once per merge so that one merge sees one consistent ordering.
    pub fn less_than(&self, other: &Self, enhanced: bool) -> bool {
        if self.preferred != other.preferred {
            return self.preferred;
        }

        if enhanced && (self.has_metrics() || other.has_metrics()) {
            match (self.score, other.score) {
                (Some(mine), Some(theirs)) if mine != theirs => return mine < theirs,
                (Some(_), None) => return true,
                (None, Some(_)) => return false,
                _ => {}
            }
            if let (Some(mine), Some(theirs)) = (self.hop_count, other.hop_count) {
                if mine != theirs {
                    return mine < theirs;
                }
            }
            if let (Some(mine), Some(theirs)) = (self.distance, other.distance) {
                if mine != theirs {
                    return mine < theirs;
                }
            }
            if let (Some(mine), Some(theirs)) = (self.bandwidth, other.bandwidth) {
                if mine != theirs {
                    return mine > theirs;
                }
            }
        }

        match (self.numa_affinity, other.numa_affinity) {
            (Some(mine), Some(theirs)) => mine.is_narrower_than(theirs),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

#[cfg(any(test, feature = "proptest"))]
impl Arbitrary for TopologyHint {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        let affinity = prop_oneof![
            1 => Just(None),
            4 => crate::strategies::nonempty_mask().prop_map(Some),
        ];
        let metrics = prop_oneof![
            2 => Just((None, None, None, None)),
            3 => (
                proptest::option::of(0u32..4),
                proptest::option::of(10.0f64..200.0),
                proptest::option::of(10u32..100),
                proptest::option::of(0.0f64..100.0),
            ),
        ];
        (affinity, any::<bool>(), metrics)
            .prop_map(|(numa_affinity, preferred, metrics)| {
                let concrete = numa_affinity.is_some();
                let (hop_count, bandwidth, distance, score) = metrics;
                Self {
                    numa_affinity,
                    preferred,
                    // Don't-care hints never carry metrics
                    hop_count: hop_count.filter(|_| concrete),
                    bandwidth: bandwidth.filter(|_| concrete),
                    distance: distance.filter(|_| concrete),
                    score: score.filter(|_| concrete),
                }
            })
            .boxed()
    }
}
