//! Admission scopes
//!
//! A scope decides at which granularity alignment happens: per execution
//! unit (each unit of a workload gets its own consensus placement) or per
//! workload (one consensus placement constrains every unit). The scope owns
//! the policy and the registered providers, gathers hints at its granularity
//! and turns a negative verdict into the [`TopologyAffinityError`] sentinel
//! that admission frameworks recognize.
//!
//! No affinity store lives here: callers receive the consensus placements
//! and hand them to their allocators themselves.

use crate::{
    errors::{ConfigurationError, TopologyAffinityError},
    hint::TopologyHint,
    policy::{Policy, PolicyKind},
    provider::{HintProvider, ResourceHints},
};
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use tracing::debug;

/// Granularity at which hints are gathered and merged
#[derive(Copy, Clone, Debug, Display, EnumIter, EnumString, Eq, Hash, IntoStaticStr, PartialEq)]
pub enum Scope {
    /// One consensus placement per execution unit
    #[strum(serialize = "unit")]
    Unit,

    /// One consensus placement for the whole workload
    #[strum(serialize = "workload")]
    Workload,
}

impl Scope {
    /// Looks up a scope by name
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::UnknownScope`] for an unrecognized name.
    pub fn from_name(name: &str) -> Result<Self, ConfigurationError> {
        Self::from_str(name).map_err(|_| ConfigurationError::UnknownScope(name.to_owned()))
    }
}

/// Consensus placement for one execution unit
#[derive(Clone, Debug, PartialEq)]
pub struct UnitAlignment {
    /// Unit the placement applies to
    pub unit: String,

    /// Consensus placement the providers agreed on
    pub hint: TopologyHint,
}

/// Hint gathering and admission at a fixed scope
///
/// # Examples
///
/// ```
/// use numalign::{
///     AdmissionScope, NumaInfo, PolicyKind, Policy, PolicyOptions, Scope,
/// };
///
/// let numa = NumaInfo::with_uniform_distance(&[0, 1], 11)?;
/// let policy = Policy::new(PolicyKind::BestEffort, numa, PolicyOptions::default())?;
/// let scope = AdmissionScope::new(Scope::Unit, policy);
/// // With no providers registered, everything is admitted with the seed
/// let aligned = scope.admit("web", &["server"]).unwrap();
/// assert_eq!(aligned.len(), 1);
/// # Ok::<(), numalign::ConfigurationError>(())
/// ```
pub struct AdmissionScope {
    scope: Scope,
    policy: Policy,
    providers: Vec<Box<dyn HintProvider>>,
}

impl AdmissionScope {
    /// Creates a scope with no registered providers
    pub fn new(scope: Scope, policy: Policy) -> Self {
        Self {
            scope,
            policy,
            providers: Vec::new(),
        }
    }

    /// Registers a provider to be consulted on every admission
    pub fn add_hint_provider(&mut self, provider: Box<dyn HintProvider>) {
        self.providers.push(provider);
    }

    /// Granularity of this scope
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Policy admissions are judged by
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Aligns a workload's units, or rejects the workload
    ///
    /// # Errors
    ///
    /// [`TopologyAffinityError`] as soon as any merge refuses admission.
    pub fn admit(
        &self,
        workload: &str,
        units: &[&str],
    ) -> Result<Vec<UnitAlignment>, TopologyAffinityError> {
        // The none policy admits unconditionally and has no use for hints,
        // so providers are not even consulted
        if self.policy.kind() == PolicyKind::None {
            return Ok(units
                .iter()
                .map(|&unit| UnitAlignment {
                    unit: unit.to_owned(),
                    hint: TopologyHint::dont_care(false),
                })
                .collect());
        }

        match self.scope {
            Scope::Unit => units
                .iter()
                .map(|&unit| {
                    let gathered: Vec<ResourceHints> = self
                        .providers
                        .iter()
                        .map(|provider| provider.unit_hints(workload, unit))
                        .collect();
                    let (hint, admit) = self.policy.merge(&gathered);
                    debug!(workload, unit, ?hint, admit, "unit alignment computed");
                    admit
                        .then(|| UnitAlignment {
                            unit: unit.to_owned(),
                            hint,
                        })
                        .ok_or(TopologyAffinityError)
                })
                .collect(),
            Scope::Workload => {
                let gathered: Vec<ResourceHints> = self
                    .providers
                    .iter()
                    .map(|provider| provider.workload_hints(workload))
                    .collect();
                let (hint, admit) = self.policy.merge(&gathered);
                debug!(workload, ?hint, admit, "workload alignment computed");
                if !admit {
                    return Err(TopologyAffinityError);
                }
                Ok(units
                    .iter()
                    .map(|&unit| UnitAlignment {
                        unit: unit.to_owned(),
                        hint,
                    })
                    .collect())
            }
        }
    }
}
