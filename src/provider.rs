//! Hint provider contract
//!
//! Providers are the components that actually manage a class of resources
//! (CPU scheduler, memory allocator, device plugins) and therefore know
//! which placements could satisfy a request. The alignment core only sees
//! them through the [`HintProvider`] trait: a map from resource name to
//! candidate placements, produced at admission time and consumed by the
//! selected policy.
//!
//! Two reference generators live in the submodules, one for countable
//! devices and one for byte-granular memory. They implement the enumeration
//! pattern that real providers follow and are used as-is by hosts whose
//! inventory fits their model.

pub mod device;
pub mod memory;

use crate::hint::TopologyHint;
use derive_more::{AsRef, Display, From};
use std::collections::BTreeMap;

/// Name of a resource class, e.g. `cpu`, `memory` or `vendor.com/gpu`
#[derive(AsRef, Clone, Debug, Display, Eq, From, Hash, Ord, PartialEq, PartialOrd)]
#[from(forward)]
pub struct ResourceName(String);

/// Hints for every resource class a provider manages
///
/// A `None` value means the provider has no topology preference for that
/// resource (any placement works); an empty list means no placement can
/// satisfy the request, which steers the merge towards rejection. The map is
/// ordered so that merging walks resources deterministically.
pub type ResourceHints = BTreeMap<ResourceName, Option<Vec<TopologyHint>>>;

/// A component consulted for placement candidates during admission
///
/// Hints are gathered either per execution unit or for the workload as a
/// whole, depending on the admission scope in use. Implementations must
/// synchronize their own mutable state (allocation tables and the like)
/// before answering; the core treats every call as a pure snapshot.
pub trait HintProvider {
    /// Candidate placements for one execution unit of a workload
    fn unit_hints(&self, workload: &str, unit: &str) -> ResourceHints;

    /// Candidate placements for a workload as a whole
    fn workload_hints(&self, workload: &str) -> ResourceHints;
}
