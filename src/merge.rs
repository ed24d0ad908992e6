//! Cross-product merging of provider hints
//!
//! Each admission request produces, per resource, a list of candidate
//! placements. The merger walks every combination of one hint per resource,
//! intersects the placements, and keeps the best surviving candidate under
//! the hint ranking. The walk is an explicit odometer over the hint lists
//! rather than a recursion: the full cross product is visited lazily, one
//! tuple at a time, in a fixed deterministic order (provider list order,
//! rightmost resource fastest).
//!
//! Two merging modes exist behind one skeleton. Classic mode ranks merged
//! candidates by preference and placement narrowness only. Enhanced mode
//! additionally combines the interconnect metrics of each tuple
//! (pessimistically: worst hop count, worst distance, bottleneck bandwidth,
//! summed score) and lets them drive the ranking. The distributed flavour of
//! enhanced mode stops the narrowness tie-break from penalizing multi-node
//! placements, so that spreading policies can rank them on score alone.

use crate::{bitmask::BitMask, hint::TopologyHint, numa::NumaInfo};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;

/// Ranking and metric-combination behavior of a [`HintMerger`]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum MergeMode {
    /// Preference and placement narrowness only
    Classic,

    /// Combine and rank by interconnect metrics as well
    Enhanced {
        /// Rank multi-node candidates by score alone within a preference
        /// band, instead of favoring narrower placements
        distributed: bool,
    },
}

impl MergeMode {
    /// Truth that this mode considers interconnect metrics
    fn enhanced(self) -> bool {
        matches!(self, Self::Enhanced { .. })
    }
}

/// Single-use merger for one admission request
///
/// Holds the policy-filtered hint lists (one inner list per resource) and
/// the merging mode snapshotted by the policy, so the whole merge sees one
/// consistent ruleset however the process-wide toggle moves underneath.
pub(crate) struct HintMerger<'numa> {
    /// Machine topology, source of the default affinity
    numa: &'numa NumaInfo,

    /// Policy-filtered hints, one list per requested resource
    hints: Vec<Vec<TopologyHint>>,

    /// Ranking and combination behavior
    mode: MergeMode,
}

impl<'numa> HintMerger<'numa> {
    pub(crate) fn new(numa: &'numa NumaInfo, hints: Vec<Vec<TopologyHint>>, mode: MergeMode) -> Self {
        Self { numa, hints, mode }
    }

    /// Computes the consensus hint
    ///
    /// Starts from the seed `{default affinity, not preferred}` and keeps the
    /// best non-empty merged candidate. With no input, or with a resource
    /// that has no candidate placements at all, the seed is returned
    /// unchanged; deciding what that means for admission is the policy's
    /// business.
    pub(crate) fn merge(&self) -> TopologyHint {
        let default_affinity = self.numa.default_affinity_mask();
        let mut best = TopologyHint::new(default_affinity, false);
        if self.hints.is_empty() || self.hints.iter().any(Vec::is_empty) {
            return best;
        }

        let min_affinity_size = self.min_affinity_size();
        let mut cursor = vec![0usize; self.hints.len()];
        loop {
            if let Some(candidate) = self.merge_tuple(&cursor, default_affinity, min_affinity_size)
            {
                if self.candidate_beats(&candidate, &best) {
                    best = candidate;
                }
            }
            if !self.advance(&mut cursor) {
                return best;
            }
        }
    }

    /// Smallest placement cardinality that any provider still deems
    /// satisfying
    ///
    /// Preferred hints are authoritative when any exist; otherwise every
    /// concrete hint counts; a purely don't-care input falls back to the
    /// whole machine. Merged candidates wider than this cannot be preferred,
    /// whatever their contributors said.
    fn min_affinity_size(&self) -> usize {
        let narrowest = |preferred_only: bool| {
            self.hints
                .iter()
                .flatten()
                .filter(|hint| hint.preferred || !preferred_only)
                .filter_map(|hint| hint.numa_affinity.map(|mask| mask.count()))
                .min()
        };
        narrowest(true)
            .or_else(|| narrowest(false))
            .unwrap_or_else(|| self.numa.node_count())
    }

    /// Merges the tuple selected by `cursor` into one candidate, `None` if
    /// the placements have no node in common
    fn merge_tuple(
        &self,
        cursor: &[usize],
        default_affinity: BitMask,
        min_affinity_size: usize,
    ) -> Option<TopologyHint> {
        let mut affinity = default_affinity;
        let mut preferred = true;
        let mut metrics = CombinedMetrics::default();
        for (slot, &pick) in cursor.iter().enumerate() {
            let hint = &self.hints[slot][pick];
            // A don't-care slot contributes the default affinity, which is
            // already the accumulator's starting point
            if let Some(mask) = hint.numa_affinity {
                affinity &= mask;
            }
            preferred &= hint.preferred;
            if self.mode.enhanced() {
                metrics.absorb(hint);
            }
        }
        if affinity.is_empty() {
            return None;
        }

        let mut merged = TopologyHint::new(affinity, preferred && affinity.count() <= min_affinity_size);
        if self.mode.enhanced() {
            metrics.store_into(&mut merged);
        }
        Some(merged)
    }

    /// Moves `cursor` to the next tuple, rightmost resource fastest
    fn advance(&self, cursor: &mut [usize]) -> bool {
        for slot in (0..cursor.len()).rev() {
            cursor[slot] += 1;
            if cursor[slot] < self.hints[slot].len() {
                return true;
            }
            cursor[slot] = 0;
        }
        false
    }

    /// Truth that `candidate` should replace the incumbent `best`
    fn candidate_beats(&self, candidate: &TopologyHint, best: &TopologyHint) -> bool {
        if let MergeMode::Enhanced { distributed: true } = self.mode {
            let spans_nodes = |hint: &TopologyHint| {
                hint.numa_affinity.is_some_and(|mask| mask.count() > 1)
            };
            if candidate.preferred == best.preferred
                && spans_nodes(candidate)
                && spans_nodes(best)
            {
                if let (Some(new), Some(incumbent)) = (candidate.score, best.score) {
                    return new < incumbent;
                }
            }
        }
        candidate.less_than(best, self.mode.enhanced())
    }
}

/// Tuple-wide combination of interconnect metrics
///
/// Pessimistic on every axis: the tuple is only as close as its farthest
/// member and only as fast as its slowest link, while placement scores add
/// up. A present side always propagates past an absent one; a metric that no
/// tuple member carries stays absent on the merged candidate.
#[derive(Copy, Clone, Debug, Default)]
struct CombinedMetrics {
    hop_count: Option<u32>,
    bandwidth: Option<f64>,
    distance: Option<u32>,
    score: Option<f64>,
}

impl CombinedMetrics {
    fn absorb(&mut self, hint: &TopologyHint) {
        self.hop_count = combine(self.hop_count, hint.hop_count, u32::max);
        self.distance = combine(self.distance, hint.distance, u32::max);
        self.bandwidth = combine(self.bandwidth, hint.bandwidth, f64::min);
        self.score = combine(self.score, hint.score, |acc, next| acc + next);
    }

    fn store_into(self, merged: &mut TopologyHint) {
        merged.hop_count = self.hop_count;
        merged.bandwidth = self.bandwidth;
        merged.distance = self.distance;
        merged.score = self.score;
    }
}

/// Combines two optional metric values, propagating a lone present side
fn combine<T>(acc: Option<T>, next: Option<T>, merge: impl FnOnce(T, T) -> T) -> Option<T> {
    match (acc, next) {
        (Some(acc), Some(next)) => Some(merge(acc, next)),
        (Some(acc), None) => Some(acc),
        (None, next) => next,
    }
}
