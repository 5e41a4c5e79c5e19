//! Pure bit-twiddling over the index-addressed binary accumulation tree.
//!
//! The tree's inner nodes are identified by the smallest leaf index they
//! cover; parent/child/subtree relations fall out of clearing or setting the
//! lowest set bit of that index. Every function here is O(1) and allocation
//! free.

use crate::error::SummationError;

/// Global root of the tree; has no parent.
pub const ROOT: u64 = 0;

/// `parent(i) = i & (i - 1)`: clears the lowest set bit.
///
/// Defined only for `i > 0`; index 0 is the global root and has no parent.
pub fn parent(i: u64) -> Result<u64, SummationError> {
    if i == 0 {
        return Err(SummationError::InvalidIndex {
            index: i,
            reason: "index 0 is the tree root and has no parent",
        });
    }
    Ok(i & (i - 1))
}

/// `largest_child(i) = i | (i - 1)`: sets every bit below the lowest set bit.
///
/// Defined only for `i > 0`.
pub fn largest_child(i: u64) -> Result<u64, SummationError> {
    if i == 0 {
        return Err(SummationError::InvalidIndex {
            index: i,
            reason: "subtree shape for index 0 is the whole tree, not a bit-derived range",
        });
    }
    Ok(i | (i - 1))
}

/// Number of leaves in the subtree rooted at `i`: the largest power of two
/// dividing `i`, equivalently `largest_child(i) + 1 - i`.
///
/// Defined only for `i > 0`. For `i = 0` callers must treat the subtree as
/// the whole tree of depth `ceil(log2(n))` explicitly (spec.md 4.A).
pub fn subtree_size(i: u64) -> Result<u64, SummationError> {
    let lc = largest_child(i)?;
    Ok(lc + 1 - i)
}

/// Infallible variant of [`parent`] for callers that have already
/// established `i > 0` (hot loops in the engine and planner).
#[inline]
pub fn parent_unchecked(i: u64) -> u64 {
    debug_assert!(i != 0, "parent_unchecked called with i == 0");
    i & (i - 1)
}

/// Infallible variant of [`largest_child`].
#[inline]
pub fn largest_child_unchecked(i: u64) -> u64 {
    debug_assert!(i != 0, "largest_child_unchecked called with i == 0");
    i | (i - 1)
}

/// Infallible variant of [`subtree_size`].
#[inline]
pub fn subtree_size_unchecked(i: u64) -> u64 {
    largest_child_unchecked(i) + 1 - i
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// spec.md 8 Invariant 1: parent/subtree relations hold for every
        /// non-zero index, not just the small hand-picked cases above.
        #[test]
        fn invariant_1_parent_and_subtree_relations(i in 1u64..=u32::MAX as u64) {
            let p = parent(i).unwrap();
            let lc = largest_child(i).unwrap();
            let size = subtree_size(i).unwrap();

            prop_assert!(p < i);
            prop_assert_eq!(p, i & (i - 1));
            prop_assert!(size.is_power_of_two());
            prop_assert_eq!(lc + 1 - i, size);
        }
    }

    #[test]
    fn parent_of_zero_is_invalid_index() {
        assert!(matches!(
            parent(0),
            Err(SummationError::InvalidIndex { index: 0, .. })
        ));
    }

    #[test]
    fn parent_clears_lowest_bit() {
        assert_eq!(parent(5).unwrap(), 4);
        assert_eq!(parent(4).unwrap(), 0);
        assert_eq!(parent(2).unwrap(), 0);
        assert_eq!(parent(6).unwrap(), 4);
    }

    #[test]
    fn subtree_size_is_power_of_two() {
        for i in 1..256u64 {
            let s = subtree_size(i).unwrap();
            assert!(s.is_power_of_two());
            assert_eq!(s, 1u64 << i.trailing_zeros());
        }
    }

    #[test]
    fn subtree_size_matches_largest_child_relation() {
        for i in 1..256u64 {
            let lc = largest_child(i).unwrap();
            let s = subtree_size(i).unwrap();
            assert_eq!(lc + 1 - i, s);
        }
    }

    #[test]
    fn odd_indices_are_leaves() {
        for i in (1..256u64).step_by(2) {
            assert_eq!(subtree_size(i).unwrap(), 1);
        }
    }
}
