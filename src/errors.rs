//! Crate-wide error types
//!
//! Errors in this crate fall into two families. Configuration problems are
//! caught once, at policy or scope construction, and are fatal to the caller:
//! there is no point admitting workloads against a policy that cannot
//! represent the machine. Alignment failures, on the other hand, are a normal
//! outcome of merging and surface as the [`TopologyAffinityError`] sentinel
//! that admission frameworks match on to reject a workload.
//!
//! Merging itself is total: malformed hints are logged and dropped, never
//! propagated as errors.

use thiserror::Error;

/// A problem with the requested alignment setup, detected at construction
///
/// All variants are fatal: the policy (or scope) under construction is
/// unusable and the host should fail loudly rather than admit workloads
/// without alignment.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// The requested policy name matches no known admission policy
    #[error("unknown alignment policy {0:?}")]
    UnknownPolicy(String),

    /// The requested scope name matches no known admission scope
    #[error("unknown alignment scope {0:?}")]
    UnknownScope(String),

    /// The machine has more NUMA nodes than the policy is willing to
    /// enumerate placements for
    #[error("unsupported on machines with more than {max} NUMA nodes (found {count})")]
    TooManyNumaNodes {
        /// Number of NUMA nodes on the machine
        count: usize,
        /// Configured enumeration limit
        max: usize,
    },

    /// The NUMA node list or distance matrix is malformed
    #[error("invalid NUMA topology: {0}")]
    InvalidNumaTopology(String),
}

/// Sentinel error for a workload whose resources cannot be aligned
///
/// Returned by the admission scopes when the selected policy refuses the
/// consensus hint. Callers that drive [`Policy::merge`] directly construct
/// this themselves when the verdict is negative.
///
/// [`Policy::merge`]: crate::policy::Policy::merge
#[derive(Copy, Clone, Debug, Default, Eq, Error, Hash, PartialEq)]
#[error("resources cannot be aligned with NUMA topology locality")]
pub struct TopologyAffinityError;
