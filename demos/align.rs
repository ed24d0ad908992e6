//! Walks a workload through hint generation, merging and admission on a
//! synthetic two-node machine.

use numalign::{
    features, BitMask, DeviceHintGenerator, MemoryHintGenerator, NumaInfo, Policy, PolicyKind,
    PolicyOptions, ResourceHints,
};
use std::collections::HashSet;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().compact().init();
    features::set_enhanced_hints(true);

    let numa = NumaInfo::with_uniform_distance(&[0, 1], 21)?;

    // Two accelerators, one per node
    let mut devices = DeviceHintGenerator::new(&numa);
    devices.add_device("acc-0", Some(BitMask::from_nodes([0]).unwrap()));
    devices.add_device("acc-1", Some(BitMask::from_nodes([1]).unwrap()));
    let available: HashSet<String> = ["acc-0", "acc-1"].iter().map(ToString::to_string).collect();

    // 4 GiB free on each node
    let mut memory = MemoryHintGenerator::new(&numa);
    for &node in numa.nodes() {
        memory.set_free_capacity(node, 4 << 30);
    }

    // The workload wants one accelerator and 2 GiB of memory
    let mut provider_hints = ResourceHints::new();
    provider_hints.insert(
        "vendor.com/accelerator".into(),
        Some(devices.generate_hints(1, &available, &HashSet::new())),
    );
    provider_hints.insert("memory".into(), Some(memory.generate_hints(2 << 30)));

    for (resource, hints) in &provider_hints {
        println!("hints for {resource}:");
        for hint in hints.iter().flatten() {
            println!("  {hint:?}");
        }
    }

    for kind in [
        PolicyKind::BestEffort,
        PolicyKind::Restricted,
        PolicyKind::SingleNumaNode,
        PolicyKind::Distributed,
    ] {
        let policy = Policy::new(kind, numa.clone(), PolicyOptions::default())?;
        let (consensus, admit) = policy.merge(std::slice::from_ref(&provider_hints));
        println!(
            "{}: admit={admit} placement={} score={:?}",
            policy.name(),
            consensus
                .numa_affinity
                .map_or_else(|| "any".to_owned(), |mask| mask.to_string()),
            consensus.score,
        );
    }
    Ok(())
}
