//! Topology-aware hint generation and merging for NUMA-aligned admission
//!
//! Modern multi-socket machines split their CPUs, memory and attached
//! devices across NUMA nodes, and a workload performs best when everything
//! it was granted sits on the same nodes. This library is the decision core
//! of a node-level admission layer that makes that happen: each resource
//! *provider* (CPU scheduler, memory allocator, device plugins) proposes the
//! NUMA placements that could satisfy its share of a request as
//! [`TopologyHint`]s, and an admission [`Policy`] merges them into a single
//! consensus placement that every provider can honor simultaneously, or
//! rejects the workload when no compatible alignment exists.
//!
//! # Usage
//!
//! Build a [`NumaInfo`] from the machine's node list and distance matrix,
//! pick a policy by name, and feed it the providers' hints:
//!
//! ```
//! use numalign::{new_policy, BitMask, NumaInfo, PolicyOptions, ResourceHints, TopologyHint};
//!
//! let numa = NumaInfo::with_uniform_distance(&[0, 1], 11)?;
//! let policy = new_policy("restricted", numa, PolicyOptions::default())?;
//!
//! // One hint map per provider; here a single provider offers two
//! // placements for its CPUs and prefers node 0
//! let mut cpus = ResourceHints::new();
//! cpus.insert(
//!     "cpu".into(),
//!     Some(vec![
//!         TopologyHint::new(BitMask::from_nodes([0]).unwrap(), true),
//!         TopologyHint::new(BitMask::from_nodes([0, 1]).unwrap(), false),
//!     ]),
//! );
//!
//! let (consensus, admit) = policy.merge(&[cpus]);
//! assert!(admit);
//! assert_eq!(consensus.numa_affinity, Some(BitMask::from_nodes([0]).unwrap()));
//! # Ok::<(), numalign::ConfigurationError>(())
//! ```
//!
//! Hosts that want the full gather-and-admit flow register
//! [`HintProvider`]s on an [`AdmissionScope`] instead of calling
//! [`Policy::merge()`] by hand.
//!
//! # Interconnect metrics
//!
//! With the process-wide toggle of [`features`] enabled, hints additionally
//! carry hop counts, NUMA distances, bandwidth estimates and a combined
//! placement score, and merging ranks candidates on them. The classic
//! ranking is unchanged for hints that carry no metrics, so providers can
//! migrate one at a time.

pub mod bitmask;
pub mod errors;
pub mod features;
pub mod hint;
mod merge;
pub mod numa;
pub mod policy;
pub mod provider;
pub mod scope;
#[cfg(any(test, feature = "proptest"))]
mod strategies;

pub use self::{
    bitmask::{BitMask, MaskEnumerator, NodeOutOfRange},
    errors::{ConfigurationError, TopologyAffinityError},
    hint::TopologyHint,
    numa::{NodeId, NumaInfo, NumaNode},
    policy::{new_policy, Policy, PolicyKind, PolicyOptions},
    provider::{
        device::DeviceHintGenerator, memory::MemoryHintGenerator, HintProvider, ResourceHints,
        ResourceName,
    },
    scope::{AdmissionScope, Scope, UnitAlignment},
};
