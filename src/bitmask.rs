//! NUMA node sets and their canonical enumeration
//!
//! Affinity masks are the currency of every alignment decision in this crate:
//! providers express candidate placements as masks over the machine's NUMA
//! node indices, and the merging machinery intersects and ranks them. The
//! [`BitMask`] type models such a set with value semantics, and
//! [`MaskEnumerator`] walks every non-empty subset of a node list in the
//! canonical order that the hint generators and mergers rely on.
//!
//! Masks are plain 64-bit values, cheap to copy and compare. They are
//! intended to be built once and then treated as immutable; all combining
//! operations return new masks.

use arrayvec::ArrayVec;
#[cfg(any(test, feature = "proptest"))]
use proptest::prelude::*;
#[allow(unused)]
#[cfg(test)]
use similar_asserts::assert_eq;
use std::{
    borrow::Borrow,
    fmt::{self, Debug, Display, Formatter},
    iter::FusedIterator,
    ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Sub, SubAssign},
};
use thiserror::Error;

/// A set of NUMA node indices
///
/// The universe of valid indices is `0..=BitMask::MAX_INDEX`. Machines
/// handled by this crate have far fewer nodes than that (see
/// [`PolicyOptions::max_allowable_numa_nodes`]), but the mask itself does not
/// know about the machine: range validation against the actual node list is
/// the job of [`NumaInfo`].
///
/// # Examples
///
/// ```
/// use numalign::BitMask;
///
/// let a = BitMask::from_nodes([0, 1])?;
/// let b = BitMask::from_nodes([1, 2])?;
/// assert_eq!((a & b).to_string(), "1");
/// assert_eq!((a | b).to_string(), "0-2");
/// # Ok::<(), numalign::NodeOutOfRange>(())
/// ```
///
/// [`NumaInfo`]: crate::numa::NumaInfo
/// [`PolicyOptions::max_allowable_numa_nodes`]: crate::policy::PolicyOptions::max_allowable_numa_nodes
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq)]
pub struct BitMask(u64);

impl BitMask {
    /// Highest node index that a mask can hold
    pub const MAX_INDEX: usize = 63;

    // === Constructors ===

    /// Creates an empty mask
    ///
    /// # Examples
    ///
    /// ```
    /// use numalign::BitMask;
    ///
    /// let empty = BitMask::new();
    /// assert!(empty.is_empty());
    /// ```
    pub const fn new() -> Self {
        Self(0)
    }

    /// Creates a mask with the given node indices set
    ///
    /// Duplicate indices are fine, they set the same bit twice.
    ///
    /// # Errors
    ///
    /// [`NodeOutOfRange`] if any index exceeds [`BitMask::MAX_INDEX`].
    ///
    /// # Examples
    ///
    /// ```
    /// use numalign::BitMask;
    ///
    /// let mask = BitMask::from_nodes([0, 2, 3])?;
    /// assert_eq!(mask.count(), 3);
    /// assert!(BitMask::from_nodes([64]).is_err());
    /// # Ok::<(), numalign::NodeOutOfRange>(())
    /// ```
    pub fn from_nodes(nodes: impl IntoIterator<Item = usize>) -> Result<Self, NodeOutOfRange> {
        let mut mask = Self::new();
        for node in nodes {
            mask.set(node)?;
        }
        Ok(mask)
    }

    /// Creates a mask from node indices that were already range-checked
    ///
    /// Callers must have validated every index against
    /// [`BitMask::MAX_INDEX`]; [`NumaInfo`] construction is the usual place
    /// where that happens.
    ///
    /// [`NumaInfo`]: crate::numa::NumaInfo
    pub(crate) fn from_validated_nodes(nodes: impl IntoIterator<Item = usize>) -> Self {
        let mut bits = 0u64;
        for node in nodes {
            debug_assert!(node <= Self::MAX_INDEX);
            bits |= 1 << (node as u32 & 63);
        }
        Self(bits)
    }

    // === Getters and setters ===

    /// Sets the bit for `node`
    ///
    /// # Errors
    ///
    /// [`NodeOutOfRange`] if `node` exceeds [`BitMask::MAX_INDEX`].
    pub fn set(&mut self, node: usize) -> Result<(), NodeOutOfRange> {
        if node > Self::MAX_INDEX {
            return Err(NodeOutOfRange(node));
        }
        self.0 |= 1 << node;
        Ok(())
    }

    /// Clears the bit for `node`
    ///
    /// # Errors
    ///
    /// [`NodeOutOfRange`] if `node` exceeds [`BitMask::MAX_INDEX`].
    pub fn unset(&mut self, node: usize) -> Result<(), NodeOutOfRange> {
        if node > Self::MAX_INDEX {
            return Err(NodeOutOfRange(node));
        }
        self.0 &= !(1 << node);
        Ok(())
    }

    /// Clears every bit
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Truth that the bit for `node` is set
    ///
    /// Out-of-range indices are never set.
    pub fn is_set(&self, node: usize) -> bool {
        node <= Self::MAX_INDEX && self.0 & (1 << node) != 0
    }

    /// Truth that at least one of the given indices is set
    ///
    /// # Examples
    ///
    /// ```
    /// use numalign::BitMask;
    ///
    /// let mask = BitMask::from_nodes([1, 3])?;
    /// assert!(mask.any_set([0, 1]));
    /// assert!(!mask.any_set([0, 2]));
    /// # Ok::<(), numalign::NodeOutOfRange>(())
    /// ```
    pub fn any_set(&self, nodes: impl IntoIterator<Item = usize>) -> bool {
        nodes.into_iter().any(|node| self.is_set(node))
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Truth that no bit is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Lowest set node index, if any
    pub fn first_set(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.0.trailing_zeros() as usize)
    }

    /// Iterates over the set node indices in ascending order
    pub fn iter_set(&self) -> SetIndices {
        SetIndices(self.0)
    }

    // === Set predicates ===

    /// Truth that `self` and `rhs` have at least one set bit in common
    pub fn intersects(&self, rhs: impl Borrow<Self>) -> bool {
        self.0 & rhs.borrow().0 != 0
    }

    /// Truth that `self` contains every set bit of `rhs`
    pub fn includes(&self, rhs: impl Borrow<Self>) -> bool {
        let rhs = rhs.borrow().0;
        self.0 & rhs == rhs
    }

    /// Truth that `self` is a narrower placement than `rhs`
    ///
    /// "Narrower" is the total order that the hint ranking machinery uses to
    /// break ties between placements of equal preference: a proper subset is
    /// narrower than its superset, and otherwise the ascending sequences of
    /// set indices are compared lexicographically. Two equal masks are not
    /// narrower than each other.
    ///
    /// # Examples
    ///
    /// ```
    /// use numalign::BitMask;
    ///
    /// let single = BitMask::from_nodes([0])?;
    /// let pair = BitMask::from_nodes([0, 1])?;
    /// assert!(single.is_narrower_than(pair));
    /// assert!(!pair.is_narrower_than(single));
    ///
    /// // Not a subset relation, so the index sequences [0, 3] and [1, 2] decide
    /// let a = BitMask::from_nodes([0, 3])?;
    /// let b = BitMask::from_nodes([1, 2])?;
    /// assert!(a.is_narrower_than(b));
    /// # Ok::<(), numalign::NodeOutOfRange>(())
    /// ```
    pub fn is_narrower_than(&self, rhs: impl Borrow<Self>) -> bool {
        let rhs = *rhs.borrow();
        if *self == rhs {
            return false;
        }
        if rhs.includes(self) {
            return true;
        }
        if self.includes(rhs) {
            return false;
        }
        self.iter_set().lt(rhs.iter_set())
    }
}

impl<B: Borrow<BitMask>> BitAnd<B> for BitMask {
    type Output = Self;

    fn bitand(self, rhs: B) -> Self {
        Self(self.0 & rhs.borrow().0)
    }
}

impl<B: Borrow<BitMask>> BitAnd<B> for &BitMask {
    type Output = BitMask;

    fn bitand(self, rhs: B) -> BitMask {
        *self & rhs
    }
}

impl<B: Borrow<BitMask>> BitAndAssign<B> for BitMask {
    fn bitand_assign(&mut self, rhs: B) {
        self.0 &= rhs.borrow().0;
    }
}

impl<B: Borrow<BitMask>> BitOr<B> for BitMask {
    type Output = Self;

    fn bitor(self, rhs: B) -> Self {
        Self(self.0 | rhs.borrow().0)
    }
}

impl<B: Borrow<BitMask>> BitOr<B> for &BitMask {
    type Output = BitMask;

    fn bitor(self, rhs: B) -> BitMask {
        *self | rhs
    }
}

impl<B: Borrow<BitMask>> BitOrAssign<B> for BitMask {
    fn bitor_assign(&mut self, rhs: B) {
        self.0 |= rhs.borrow().0;
    }
}

impl<B: Borrow<BitMask>> Sub<B> for BitMask {
    type Output = Self;

    /// Set difference: the bits of `self` that are not in `rhs`
    fn sub(self, rhs: B) -> Self {
        Self(self.0 & !rhs.borrow().0)
    }
}

impl<B: Borrow<BitMask>> Sub<B> for &BitMask {
    type Output = BitMask;

    fn sub(self, rhs: B) -> BitMask {
        *self - rhs
    }
}

impl<B: Borrow<BitMask>> SubAssign<B> for BitMask {
    fn sub_assign(&mut self, rhs: B) {
        self.0 &= !rhs.borrow().0;
    }
}

impl Debug for BitMask {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BitMask({self})")
    }
}

impl Display for BitMask {
    /// Renders the set indices as a comma-separated list of ranges
    ///
    /// ```
    /// use numalign::BitMask;
    ///
    /// let mask = BitMask::from_nodes([0, 2, 3, 4])?;
    /// assert_eq!(mask.to_string(), "0,2-4");
    /// # Ok::<(), numalign::NodeOutOfRange>(())
    /// ```
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut indices = self.iter_set().peekable();
        let mut first = true;
        while let Some(start) = indices.next() {
            let mut end = start;
            while indices.peek() == Some(&(end + 1)) {
                end = indices.next().expect("peeked above");
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if end > start {
                write!(f, "{start}-{end}")?;
            } else {
                write!(f, "{start}")?;
            }
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "proptest"))]
impl Arbitrary for BitMask {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        // Bias towards the low indices that real machines actually have, with
        // empty masks as an explicit edge case
        prop_oneof![
            1 => Just(Self::new()),
            4 => proptest::collection::hash_set(crate::strategies::node_id(), 1..5)
                .prop_map(|nodes| Self::from_validated_nodes(nodes)),
        ]
        .boxed()
    }
}

/// Iterator over the set indices of a [`BitMask`], ascending
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct SetIndices(u64);

impl Iterator for SetIndices {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        (self.0 != 0).then(|| {
            let next = self.0.trailing_zeros() as usize;
            self.0 &= self.0 - 1;
            next
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self.0.count_ones() as usize;
        (count, Some(count))
    }
}

impl ExactSizeIterator for SetIndices {}

impl FusedIterator for SetIndices {}

/// A node index beyond what [`BitMask`] can represent
#[derive(Copy, Clone, Debug, Eq, Error, Hash, PartialEq)]
#[error("NUMA node index {0} is out of the supported 0..={max} range", max = BitMask::MAX_INDEX)]
pub struct NodeOutOfRange(pub usize);

/// Lazy enumeration of every non-empty subset of a node list
///
/// Masks come out in the canonical order that lets a single pass establish
/// the minimum satisfying cardinality: all 1-node masks first, then all
/// 2-node masks, and so on, each cardinality band sorted lexicographically by
/// ascending index sequence. Every subset is produced exactly once, so a node
/// list of length `n` yields `2^n - 1` masks.
///
/// # Examples
///
/// ```
/// use numalign::{BitMask, MaskEnumerator};
///
/// let masks: Vec<String> = MaskEnumerator::new(&[0, 1, 2])?
///     .map(|mask| mask.to_string())
///     .collect();
/// assert_eq!(masks, ["0", "1", "2", "0-1", "0,2", "1-2", "0-2"]);
/// # Ok::<(), numalign::NodeOutOfRange>(())
/// ```
#[derive(Clone, Debug)]
pub struct MaskEnumerator<'nodes> {
    /// Node list whose subsets are being enumerated
    nodes: &'nodes [usize],

    /// Positions into `nodes` of the last yielded combination
    cursor: ArrayVec<usize, { BitMask::MAX_INDEX + 1 }>,

    /// Enumeration state
    state: EnumState,
}

/// Progress of a [`MaskEnumerator`]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum EnumState {
    NotStarted,
    Running,
    Exhausted,
}

impl<'nodes> MaskEnumerator<'nodes> {
    /// Prepares to enumerate the subsets of `nodes`
    ///
    /// The enumeration order follows the order of the given list, so it
    /// should be sorted ascending if lexicographic mask order is expected,
    /// as [`NumaInfo`] guarantees for its node list.
    ///
    /// # Errors
    ///
    /// [`NodeOutOfRange`] if any node index exceeds [`BitMask::MAX_INDEX`].
    ///
    /// [`NumaInfo`]: crate::numa::NumaInfo
    pub fn new(nodes: &'nodes [usize]) -> Result<Self, NodeOutOfRange> {
        if let Some(&bad) = nodes.iter().find(|&&node| node > BitMask::MAX_INDEX) {
            return Err(NodeOutOfRange(bad));
        }
        Ok(Self::new_validated(nodes))
    }

    /// Like [`MaskEnumerator::new()`], for node lists that were already
    /// range-checked
    pub(crate) fn new_validated(nodes: &'nodes [usize]) -> Self {
        Self {
            nodes,
            cursor: ArrayVec::new(),
            state: EnumState::NotStarted,
        }
    }

    /// Moves `cursor` to the next combination, growing its cardinality once
    /// the current band is exhausted
    fn advance(&mut self) {
        let n = self.nodes.len();
        let k = self.cursor.len();

        // Find the rightmost cursor position that can still move right, and
        // restack everything after it
        let mut i = k;
        while i > 0 {
            i -= 1;
            if self.cursor[i] < n - k + i {
                self.cursor[i] += 1;
                for j in i + 1..k {
                    self.cursor[j] = self.cursor[j - 1] + 1;
                }
                return;
            }
        }

        // Cardinality band exhausted, open the next one
        if k == n {
            self.state = EnumState::Exhausted;
            return;
        }
        self.cursor.clear();
        self.cursor.extend(0..=k);
    }
}

impl Iterator for MaskEnumerator<'_> {
    type Item = BitMask;

    fn next(&mut self) -> Option<BitMask> {
        match self.state {
            EnumState::NotStarted => {
                if self.nodes.is_empty() {
                    self.state = EnumState::Exhausted;
                    return None;
                }
                self.state = EnumState::Running;
                self.cursor.push(0);
            }
            EnumState::Running => self.advance(),
            EnumState::Exhausted => return None,
        }
        if self.state == EnumState::Exhausted {
            return None;
        }
        Some(BitMask::from_validated_nodes(
            self.cursor.iter().map(|&pos| self.nodes[pos]),
        ))
    }
}

impl FusedIterator for MaskEnumerator<'_> {}

/// Invokes `visitor` with every non-empty subset of `nodes`, in
/// [`MaskEnumerator`] order
///
/// # Errors
///
/// [`NodeOutOfRange`] if any node index exceeds [`BitMask::MAX_INDEX`].
pub fn for_each_mask(
    nodes: &[usize],
    mut visitor: impl FnMut(BitMask),
) -> Result<(), NodeOutOfRange> {
    for mask in MaskEnumerator::new(nodes)? {
        visitor(mask);
    }
    Ok(())
}
