//! Common strategies for property-based testing
//!
//! Centralizes the proptest input generators that several modules share, so
//! that every property test draws node indices and masks from the same
//! distribution: mostly the low indices that real machines actually have,
//! with an occasional excursion towards the representable maximum.

use crate::bitmask::BitMask;
use proptest::prelude::*;

/// Generates a NUMA node index, biased towards small machines
pub(crate) fn node_id() -> impl Strategy<Value = usize> {
    prop_oneof![
        4 => 0..4usize,
        2 => 4..8usize,
        1 => 8..=BitMask::MAX_INDEX,
    ]
}

/// Generates a mask with at least one node set
pub(crate) fn nonempty_mask() -> impl Strategy<Value = BitMask> {
    proptest::collection::hash_set(node_id(), 1..4).prop_map(BitMask::from_validated_nodes)
}
