//! Admission policies
//!
//! A policy turns the raw per-provider hint maps of one admission request
//! into a single consensus hint and a verdict. All policies share the same
//! filtering and merging machinery and differ in how strict they are about
//! the outcome: best-effort admits whatever comes out, restricted insists on
//! a preferred placement, single-numa-node additionally refuses placements
//! spanning nodes, and distributed goes the other way and actively spreads
//! multi-resource workloads.
//!
//! Whether merging considers interconnect metrics is decided once per
//! [`Policy::merge()`] call from the process-wide toggle, so a single
//! admission never sees a mix of classic and enhanced ranking.

use crate::{
    errors::ConfigurationError,
    features,
    hint::TopologyHint,
    merge::{HintMerger, MergeMode},
    numa::NumaInfo,
    provider::ResourceHints,
};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
use std::collections::BTreeSet;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use tracing::{debug, info, warn};

/// Score penalty per NUMA node beyond the first when a workload is spread
/// across the machine
const DISTRIBUTION_PENALTY_PER_NODE: f64 = 5.0;

/// Admission strategy selector
///
/// The string form of each variant is the name accepted by
/// [`new_policy()`] and produced by [`Policy::name()`].
#[derive(Copy, Clone, Debug, Display, EnumIter, EnumString, Eq, Hash, IntoStaticStr, PartialEq)]
pub enum PolicyKind {
    /// No alignment: admit everything, hint nothing
    #[strum(serialize = "none")]
    None,

    /// Align when possible, admit regardless
    #[strum(serialize = "best-effort")]
    BestEffort,

    /// Admit only workloads with a preferred consensus placement
    #[strum(serialize = "restricted")]
    Restricted,

    /// Admit only workloads that fit on a single NUMA node
    #[strum(serialize = "single-numa-node")]
    SingleNumaNode,

    /// Spread multi-resource workloads across nodes, ranking by score
    #[strum(serialize = "distributed")]
    Distributed,
}

/// Tunables shared by every policy
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct PolicyOptions {
    /// Upper bound on the machine's NUMA node count
    ///
    /// Placement enumeration is exponential in the node count, so machines
    /// beyond this bound are rejected at construction rather than ground
    /// through.
    pub max_allowable_numa_nodes: usize,
}

impl PolicyOptions {
    /// Default NUMA node bound
    pub const DEFAULT_MAX_ALLOWABLE_NUMA_NODES: usize = 8;
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            max_allowable_numa_nodes: Self::DEFAULT_MAX_ALLOWABLE_NUMA_NODES,
        }
    }
}

/// One admission policy bound to one machine
///
/// Construction is the only fallible step; [`Policy::merge()`] is total and
/// never panics, whatever the providers supply.
///
/// # Examples
///
/// ```
/// use numalign::{new_policy, BitMask, NumaInfo, PolicyOptions, ResourceHints, TopologyHint};
///
/// let numa = NumaInfo::with_uniform_distance(&[0, 1], 11)?;
/// let policy = new_policy("best-effort", numa, PolicyOptions::default())?;
///
/// let mut provider = ResourceHints::new();
/// provider.insert(
///     "cpu".into(),
///     Some(vec![TopologyHint::new(BitMask::from_nodes([0]).unwrap(), true)]),
/// );
/// let (consensus, admit) = policy.merge(&[provider]);
/// assert!(admit);
/// assert_eq!(consensus.numa_affinity, Some(BitMask::from_nodes([0]).unwrap()));
/// # Ok::<(), numalign::ConfigurationError>(())
/// ```
#[derive(Clone, Debug)]
pub struct Policy {
    kind: PolicyKind,
    numa: NumaInfo,
    opts: PolicyOptions,
}

impl Policy {
    /// Binds an admission strategy to a machine
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::TooManyNumaNodes`] if the machine exceeds
    /// [`PolicyOptions::max_allowable_numa_nodes`]. The `none` policy never
    /// enumerates placements and is exempt.
    pub fn new(
        kind: PolicyKind,
        numa: NumaInfo,
        opts: PolicyOptions,
    ) -> Result<Self, ConfigurationError> {
        if kind != PolicyKind::None && numa.node_count() > opts.max_allowable_numa_nodes {
            return Err(ConfigurationError::TooManyNumaNodes {
                count: numa.node_count(),
                max: opts.max_allowable_numa_nodes,
            });
        }
        info!(policy = %kind, nodes = numa.node_count(), "creating alignment policy");
        Ok(Self { kind, numa, opts })
    }

    /// Strategy selected at construction
    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    /// Name of the selected strategy
    pub fn name(&self) -> &'static str {
        self.kind.into()
    }

    /// Machine this policy was bound to
    pub fn numa_info(&self) -> &NumaInfo {
        &self.numa
    }

    /// Tunables this policy was built with
    pub fn options(&self) -> PolicyOptions {
        self.opts
    }

    /// Merges one admission request's hints into a consensus placement and
    /// an admission verdict
    ///
    /// The slice holds one hint map per provider, in a fixed provider order;
    /// see [`ResourceHints`] for the don't-care and reject conventions.
    pub fn merge(&self, providers_hints: &[ResourceHints]) -> (TopologyHint, bool) {
        let enhanced = features::enhanced_hints_enabled();
        let mode = if enhanced {
            MergeMode::Enhanced { distributed: false }
        } else {
            MergeMode::Classic
        };
        match self.kind {
            PolicyKind::None => (TopologyHint::dont_care(false), true),
            PolicyKind::BestEffort => {
                let filtered = filter_providers_hints(providers_hints, &self.numa);
                let best = HintMerger::new(&self.numa, filtered, mode).merge();
                (best, true)
            }
            PolicyKind::Restricted => {
                let filtered = filter_providers_hints(providers_hints, &self.numa);
                let best = HintMerger::new(&self.numa, filtered, mode).merge();
                let admit = best.preferred;
                (best, admit)
            }
            PolicyKind::SingleNumaNode => {
                let filtered =
                    filter_single_numa_hints(filter_providers_hints(providers_hints, &self.numa));
                let mut best = HintMerger::new(&self.numa, filtered, mode).merge();
                // A consensus covering the whole machine carries no placement
                // information, strip it down to a don't-care
                if best.numa_affinity == Some(self.numa.default_affinity_mask()) {
                    best = TopologyHint::dont_care(best.preferred);
                }
                let admit = best.preferred;
                (best, admit)
            }
            PolicyKind::Distributed => self.merge_distributed(providers_hints, enhanced),
        }
    }

    /// Distributed policy merging, see the module documentation
    fn merge_distributed(
        &self,
        providers_hints: &[ResourceHints],
        enhanced: bool,
    ) -> (TopologyHint, bool) {
        let filtered = filter_providers_hints(providers_hints, &self.numa);

        if !enhanced {
            debug!("enhanced metrics disabled, distributed policy falls back to best-effort merging");
            let best = HintMerger::new(&self.numa, filtered, MergeMode::Classic).merge();
            let admit = best.numa_affinity.is_some();
            return (best, admit);
        }

        if resource_type_count(providers_hints) <= 1 {
            debug!("single resource type, using plain metric-aware merging");
            let best = HintMerger::new(
                &self.numa,
                filtered,
                MergeMode::Enhanced { distributed: false },
            )
            .merge();
            let admit = best.numa_affinity.is_some();
            return (best, admit);
        }

        let base = HintMerger::new(
            &self.numa,
            filtered,
            MergeMode::Enhanced { distributed: true },
        )
        .merge();
        if self.numa.node_count() <= 1 {
            debug!("single NUMA node machine, nothing to spread over");
            let admit = base.numa_affinity.is_some();
            return (base, admit);
        }

        let spread = self.create_distributed_hint(providers_hints);
        debug!(
            placement = ?spread.numa_affinity,
            score = ?spread.score,
            "spreading workload across NUMA nodes",
        );
        let admit = spread.numa_affinity.is_some();
        (spread, admit)
    }

    /// Builds the whole-machine placement that the distributed policy
    /// substitutes for multi-resource workloads
    ///
    /// Metrics are the averages over every concrete input hint, plus a score
    /// penalty for each node the spread occupies beyond the first.
    fn create_distributed_hint(&self, providers_hints: &[ResourceHints]) -> TopologyHint {
        let mut hint_count: u32 = 0;
        let mut all_preferred = true;
        let mut total_hops: u32 = 0;
        let mut total_distance: u32 = 0;
        let mut total_bandwidth = 0.0f64;
        let mut total_score = 0.0f64;

        let concrete_hints = providers_hints
            .iter()
            .flat_map(|provider| provider.values())
            .flatten()
            .flatten()
            .filter(|hint| hint.numa_affinity.is_some());
        for hint in concrete_hints {
            hint_count += 1;
            all_preferred &= hint.preferred;
            if hint.has_metrics() {
                total_hops += hint.effective_hop_count();
                total_distance += hint.effective_distance();
                total_bandwidth += hint.effective_bandwidth();
                total_score += hint.effective_score();
            }
        }

        let affinity = self.numa.default_affinity_mask();
        let mut spread = TopologyHint::new(affinity, all_preferred);
        if hint_count > 0 {
            let penalty = DISTRIBUTION_PENALTY_PER_NODE * (affinity.count() - 1) as f64;
            spread.hop_count = Some(total_hops / hint_count);
            spread.distance = Some(total_distance / hint_count);
            spread.bandwidth = Some(total_bandwidth / f64::from(hint_count));
            spread.score = Some(total_score / f64::from(hint_count) + penalty);
        }
        spread
    }
}

/// Looks up a policy by name and binds it to a machine
///
/// # Errors
///
/// [`ConfigurationError::UnknownPolicy`] for an unrecognized name, plus
/// whatever [`Policy::new()`] can return.
pub fn new_policy(
    name: &str,
    numa: NumaInfo,
    opts: PolicyOptions,
) -> Result<Policy, ConfigurationError> {
    let kind = PolicyKind::from_str(name)
        .map_err(|_| ConfigurationError::UnknownPolicy(name.to_owned()))?;
    Policy::new(kind, numa, opts)
}

/// Flattens provider hint maps into per-resource hint lists, preserving each
/// provider's strongest signals
///
/// Conventions applied per resource:
/// - a provider with no entries at all, or a `None` entry, contributes a
///   single preferred don't-care (any placement works);
/// - an empty list contributes a single non-preferred don't-care, which
///   keeps strict policies from admitting (nothing can satisfy the request);
/// - hints whose placement misses the machine entirely are dropped with a
///   warning rather than poisoning the merge;
/// - when a resource has preferred hints, its non-preferred ones are
///   dropped.
fn filter_providers_hints(
    providers_hints: &[ResourceHints],
    numa: &NumaInfo,
) -> Vec<Vec<TopologyHint>> {
    let default_affinity = numa.default_affinity_mask();
    let mut all_resources_hints = Vec::new();
    for provider_hints in providers_hints {
        if provider_hints.is_empty() {
            debug!("provider has no NUMA preference for any resource");
            all_resources_hints.push(vec![TopologyHint::dont_care(true)]);
            continue;
        }
        for (resource, hints) in provider_hints {
            let Some(hints) = hints else {
                debug!(%resource, "provider has no NUMA preference for resource");
                all_resources_hints.push(vec![TopologyHint::dont_care(true)]);
                continue;
            };
            if hints.is_empty() {
                debug!(%resource, "provider has no possible NUMA affinities for resource");
                all_resources_hints.push(vec![TopologyHint::dont_care(false)]);
                continue;
            }

            let mut kept: Vec<TopologyHint> = hints
                .iter()
                .filter(|hint| {
                    let valid = hint
                        .numa_affinity
                        .map_or(true, |mask| mask.intersects(default_affinity));
                    if !valid {
                        warn!(%resource, hint = ?hint, "dropping hint with no reachable NUMA node");
                    }
                    valid
                })
                .copied()
                .collect();
            if kept.is_empty() {
                all_resources_hints.push(vec![TopologyHint::dont_care(false)]);
                continue;
            }
            if kept.iter().any(|hint| hint.preferred) {
                kept.retain(|hint| hint.preferred);
            }
            all_resources_hints.push(kept);
        }
    }
    all_resources_hints
}

/// Keeps only the hints a single-NUMA-node placement could come from:
/// preferred don't-cares and preferred single-node placements
fn filter_single_numa_hints(all_resources_hints: Vec<Vec<TopologyHint>>) -> Vec<Vec<TopologyHint>> {
    all_resources_hints
        .into_iter()
        .map(|resource_hints| {
            resource_hints
                .into_iter()
                .filter(|hint| {
                    hint.preferred
                        && hint
                            .numa_affinity
                            .map_or(true, |mask| mask.count() == 1)
                })
                .collect()
        })
        .collect()
}

/// Number of distinct resource types across all providers
fn resource_type_count(providers_hints: &[ResourceHints]) -> usize {
    providers_hints
        .iter()
        .flat_map(|provider| provider.keys())
        .collect::<BTreeSet<_>>()
        .len()
}
