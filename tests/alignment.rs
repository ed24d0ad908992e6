//! End-to-end admission flows through the public API
//!
//! Each test drives a policy (or the provider generators feeding one) the
//! way an admission layer would, and checks the consensus placement and
//! verdict that come out. Tests that depend on the enhanced-metrics toggle
//! wrap themselves in `features::with_enhanced_hints`, which serializes
//! toggle changes across the test threads.

use numalign::{
    features, new_policy, AdmissionScope, BitMask, DeviceHintGenerator, HintProvider,
    MemoryHintGenerator, NumaInfo, Policy, PolicyKind, PolicyOptions, ResourceHints, Scope,
    TopologyAffinityError, TopologyHint,
};
use std::collections::HashSet;

fn mask(nodes: impl IntoIterator<Item = usize>) -> BitMask {
    BitMask::from_nodes(nodes).unwrap()
}

fn two_nodes() -> NumaInfo {
    NumaInfo::with_uniform_distance(&[0, 1], 11).unwrap()
}

fn policy(kind: PolicyKind, numa: NumaInfo) -> Policy {
    Policy::new(kind, numa, PolicyOptions::default()).unwrap()
}

fn provider(entries: &[(&str, Option<Vec<TopologyHint>>)]) -> ResourceHints {
    entries
        .iter()
        .map(|(name, hints)| ((*name).into(), hints.clone()))
        .collect()
}

#[test]
fn best_effort_takes_the_only_preferred_placement() {
    features::with_enhanced_hints(false, || {
        let policy = policy(PolicyKind::BestEffort, two_nodes());
        let (hint, admit) = policy.merge(&[provider(&[(
            "cpu",
            Some(vec![TopologyHint::new(mask([0]), true)]),
        )])]);
        assert!(admit);
        assert_eq!(hint, TopologyHint::new(mask([0]), true));
    });
}

#[test]
fn restricted_rejects_conflicting_providers() {
    features::with_enhanced_hints(false, || {
        let policy = policy(PolicyKind::Restricted, two_nodes());
        let (hint, admit) = policy.merge(&[
            provider(&[("cpu", Some(vec![TopologyHint::new(mask([0]), true)]))]),
            provider(&[("gpu", Some(vec![TopologyHint::new(mask([1]), true)]))]),
        ]);
        // No placement satisfies both providers, so merging falls back to
        // the whole-machine seed, which is not preferred
        assert!(!admit);
        assert_eq!(hint, TopologyHint::new(mask([0, 1]), false));
    });
}

#[test]
fn single_numa_rejects_spanning_placements() {
    features::with_enhanced_hints(false, || {
        let policy = policy(PolicyKind::SingleNumaNode, two_nodes());
        let (hint, admit) = policy.merge(&[provider(&[(
            "cpu",
            Some(vec![TopologyHint::new(mask([0, 1]), true)]),
        )])]);
        assert!(!admit);
        // The whole-machine consensus is stripped down to a don't-care
        assert_eq!(hint, TopologyHint::dont_care(false));
    });
}

#[test]
fn single_numa_admits_a_fitting_placement() {
    features::with_enhanced_hints(false, || {
        let policy = policy(PolicyKind::SingleNumaNode, two_nodes());
        let (hint, admit) = policy.merge(&[provider(&[(
            "cpu",
            Some(vec![
                TopologyHint::new(mask([0]), true),
                TopologyHint::new(mask([0, 1]), true),
            ]),
        )])]);
        assert!(admit);
        assert_eq!(hint, TopologyHint::new(mask([0]), true));
    });
}

#[test]
fn device_generation_feeds_admission() {
    let numa = NumaInfo::with_uniform_distance(&[0, 1, 2, 3], 20).unwrap();
    let mut devices = DeviceHintGenerator::new(&numa);
    devices.add_device("acc-0", Some(mask([0])));
    devices.add_device("acc-1", Some(mask([1])));
    let available: HashSet<String> =
        ["acc-0", "acc-1"].iter().map(ToString::to_string).collect();

    features::with_enhanced_hints(true, || {
        let hints = devices.generate_hints(2, &available, &HashSet::new());

        // Two devices spread over nodes 0 and 1: the pair is the preferred
        // frontier and carries the device interconnect model
        let pair = hints
            .iter()
            .find(|hint| hint.numa_affinity == Some(mask([0, 1])))
            .expect("the {0,1} placement must be offered");
        assert!(pair.preferred);
        assert_eq!(pair.hop_count, Some(1));
        assert_eq!(pair.distance, Some(30));
        assert_eq!(pair.bandwidth, Some(48.0));

        // Fed into a policy, the preferred pair is the consensus
        let policy = Policy::new(
            PolicyKind::BestEffort,
            numa.clone(),
            PolicyOptions::default(),
        )
        .unwrap();
        let (consensus, admit) = policy.merge(&[provider(&[("acc", Some(hints))])]);
        assert!(admit);
        assert_eq!(consensus.numa_affinity, Some(mask([0, 1])));
        assert!(consensus.preferred);
    });
}

#[test]
fn distributed_spreads_and_penalizes() {
    features::with_enhanced_hints(true, || {
        let policy = policy(PolicyKind::Distributed, two_nodes());
        let cpu = TopologyHint::new(mask([0]), true).with_metrics(0, 100.0, 10, 20.0);
        let gpu = TopologyHint::new(mask([1]), true).with_metrics(1, 80.0, 20, 40.0);
        let (hint, admit) = policy.merge(&[
            provider(&[("cpu", Some(vec![cpu]))]),
            provider(&[("gpu", Some(vec![gpu]))]),
        ]);
        assert!(admit);
        assert_eq!(hint.numa_affinity, Some(mask([0, 1])));
        assert!(hint.preferred);
        assert_eq!(hint.bandwidth, Some(90.0));
        assert_eq!(hint.distance, Some(15));
        // Average score of the inputs plus the one-extra-node spread penalty
        assert_eq!(hint.score, Some(35.0));

        // One non-preferred input makes the spread non-preferred
        let gpu = TopologyHint {
            preferred: false,
            ..gpu
        };
        let (hint, _) = policy.merge(&[
            provider(&[("cpu", Some(vec![cpu]))]),
            provider(&[("gpu", Some(vec![gpu]))]),
        ]);
        assert!(!hint.preferred);
    });
}

#[test]
fn admission_verdicts_survive_the_toggle() {
    // Providers that carry no metrics must get the same verdict whichever
    // way the toggle points
    let hint_sets: Vec<Vec<ResourceHints>> = vec![
        vec![provider(&[(
            "cpu",
            Some(vec![TopologyHint::new(mask([0]), true)]),
        )])],
        vec![
            provider(&[("cpu", Some(vec![TopologyHint::new(mask([0]), true)]))]),
            provider(&[("gpu", Some(vec![TopologyHint::new(mask([1]), true)]))]),
        ],
        vec![provider(&[("cpu", Some(vec![]))])],
        vec![provider(&[("cpu", None)])],
        vec![],
    ];
    for kind in [
        PolicyKind::None,
        PolicyKind::BestEffort,
        PolicyKind::Restricted,
        PolicyKind::SingleNumaNode,
    ] {
        for hints in &hint_sets {
            let policy = policy(kind, two_nodes());
            let (_, admit_off) = features::with_enhanced_hints(false, || policy.merge(hints));
            let (_, admit_on) = features::with_enhanced_hints(true, || policy.merge(hints));
            assert_eq!(
                admit_off, admit_on,
                "policy {kind} changed its verdict with the toggle",
            );
        }
    }
}

#[test]
fn generated_hints_follow_the_toggle() {
    let numa = two_nodes();

    let mut devices = DeviceHintGenerator::new(&numa);
    devices.add_device("acc-0", Some(mask([0])));
    let available: HashSet<String> = ["acc-0".to_string()].into_iter().collect();

    let mut memory = MemoryHintGenerator::new(&numa);
    memory.set_free_capacity(0, 1 << 30);
    memory.set_free_capacity(1, 1 << 30);

    features::with_enhanced_hints(false, || {
        let device_hints = devices.generate_hints(1, &available, &HashSet::new());
        let memory_hints = memory.generate_hints(1 << 29);
        assert!(!device_hints.is_empty() && !memory_hints.is_empty());
        for hint in device_hints.iter().chain(&memory_hints) {
            assert!(!hint.has_metrics());
        }
    });

    features::with_enhanced_hints(true, || {
        let device_hints = devices.generate_hints(1, &available, &HashSet::new());
        let memory_hints = memory.generate_hints(1 << 29);
        for hint in device_hints.iter().chain(&memory_hints) {
            assert!(
                hint.hop_count.is_some()
                    && hint.bandwidth.is_some()
                    && hint.distance.is_some()
                    && hint.score.is_some(),
                "generated hint {hint:?} is missing metrics",
            );
        }
    });
}

#[test]
fn single_numa_consensus_shape() {
    // Whatever the providers offer, the single-NUMA policy only ever hands
    // out a single node or a don't-care
    let offers: Vec<Vec<ResourceHints>> = vec![
        vec![provider(&[(
            "cpu",
            Some(vec![
                TopologyHint::new(mask([0]), true),
                TopologyHint::new(mask([1]), true),
                TopologyHint::new(mask([0, 1]), true),
            ]),
        )])],
        vec![provider(&[("cpu", Some(vec![]))])],
        vec![provider(&[("cpu", None)])],
        vec![
            provider(&[("cpu", Some(vec![TopologyHint::new(mask([1]), true)]))]),
            provider(&[("mem", Some(vec![TopologyHint::new(mask([1]), true)]))]),
        ],
    ];
    features::with_enhanced_hints(false, || {
        for hints in &offers {
            let policy = policy(PolicyKind::SingleNumaNode, two_nodes());
            let (consensus, _) = policy.merge(hints);
            match consensus.numa_affinity {
                None => {}
                Some(mask) => assert_eq!(mask.count(), 1, "consensus {consensus:?} spans nodes"),
            }
        }
    });
}

#[test]
fn mixed_metric_presence_merges_safely() {
    // One provider migrated to metrics, the other did not; merging must
    // stay total and keep the metric side's data
    features::with_enhanced_hints(true, || {
        let enhanced = TopologyHint::new(mask([0]), true).with_metrics(0, 100.0, 10, 95.0);
        let basic = TopologyHint::new(mask([0]), true);
        let policy = policy(PolicyKind::BestEffort, two_nodes());
        let (consensus, admit) = policy.merge(&[
            provider(&[("enhanced-resource", Some(vec![enhanced]))]),
            provider(&[("basic-resource", Some(vec![basic]))]),
        ]);
        assert!(admit);
        assert_eq!(consensus.numa_affinity, Some(mask([0])));
        assert!(consensus.has_metrics());
        assert_eq!(consensus.score, Some(95.0));
    });
}

#[test]
fn full_admission_flow_through_a_scope() {
    struct InventoryProvider {
        numa: NumaInfo,
    }

    impl HintProvider for InventoryProvider {
        fn unit_hints(&self, _workload: &str, unit: &str) -> ResourceHints {
            let mut devices = DeviceHintGenerator::new(&self.numa);
            devices.add_device("acc-0", Some(mask([0])));
            devices.add_device("acc-1", Some(mask([1])));
            let available = ["acc-0", "acc-1"].iter().map(ToString::to_string).collect();
            // The second unit asks for more devices than exist
            let request = if unit == "greedy" { 3 } else { 1 };
            let mut hints = ResourceHints::new();
            hints.insert(
                "acc".into(),
                Some(devices.generate_hints(request, &available, &HashSet::new())),
            );
            hints
        }

        fn workload_hints(&self, workload: &str) -> ResourceHints {
            self.unit_hints(workload, "workload")
        }
    }

    features::with_enhanced_hints(false, || {
        let numa = two_nodes();
        let policy = Policy::new(
            PolicyKind::Restricted,
            numa.clone(),
            PolicyOptions::default(),
        )
        .unwrap();
        let mut scope = AdmissionScope::new(Scope::Unit, policy);
        scope.add_hint_provider(Box::new(InventoryProvider { numa }));

        let aligned = scope.admit("train", &["main"]).unwrap();
        assert_eq!(aligned.len(), 1);
        assert!(aligned[0].hint.preferred);

        // An unsatisfiable unit rejects the whole workload
        assert_eq!(
            scope.admit("train", &["main", "greedy"]).unwrap_err(),
            TopologyAffinityError,
        );
    });
}

#[test]
fn construction_surface() {
    // Name-based construction accepts every policy and scope name and
    // rejects everything else
    for name in [
        "none",
        "best-effort",
        "restricted",
        "single-numa-node",
        "distributed",
    ] {
        assert_eq!(
            new_policy(name, two_nodes(), PolicyOptions::default())
                .unwrap()
                .name(),
            name,
        );
    }
    assert!(new_policy("numa-please", two_nodes(), PolicyOptions::default()).is_err());
    assert!(Scope::from_name("socket").is_err());

    // Machines beyond the enumeration bound are refused up front
    let wide = NumaInfo::with_uniform_distance(&(0..9).collect::<Vec<_>>(), 20).unwrap();
    assert!(matches!(
        new_policy("best-effort", wide, PolicyOptions::default()),
        Err(numalign::ConfigurationError::TooManyNumaNodes { count: 9, max: 8 }),
    ));
}
