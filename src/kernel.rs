//! Local reduction kernel (spec.md 4.C): the pure arithmetic core that
//! reduces a contiguous run of summands, given a closure for fetching any
//! value that isn't in the local slice (a remote or already-accumulated
//! value). Decoupled from the message buffer and MPI entirely, so the
//! arithmetic itself can be unit tested without a transport.

/// Reduce `values[0..8]` to a single sum using the same fixed expression
/// tree on every call, so results are bit-identical across ranks and runs
/// regardless of what order the generic path would otherwise associate
/// additions in (spec.md Invariant 2).
///
/// Grounded in `original_source/src/summation/strategies/binary_tree.cpp`'s
/// `accumulate_local_8subtree`.
#[inline]
pub fn accumulate_local_8subtree(values: &[f64; 8]) -> f64 {
    let level1a = values[0] + values[1];
    let level1b = values[2] + values[3];
    let level1c = values[4] + values[5];
    let level1d = values[6] + values[7];

    let level2a = level1a + level1b;
    let level2b = level1c + level1d;

    level2a + level2b
}

/// Iteratively reduce `count` consecutive leaves starting at `begin` using
/// pairwise addition with an explicit level counter, falling back to
/// `fetch` for any operand outside `[begin, begin+count)` (spec.md 4.C).
///
/// `fetch(index)` is called with a leaf index and must return that leaf's
/// value; it is how the engine plugs in message-buffer-backed remote
/// fetches without the kernel knowing anything about MPI.
///
/// A dangling (unpaired) element at any level is carried forward to the
/// next level unmodified, rather than forcing a remote fetch for its
/// missing sibling — this is what lets ranks with odd-sized local ranges
/// reduce fully locally before crossing a rank boundary.
pub fn accumulate_range<F>(values: &[f64], mut fetch: F) -> f64
where
    F: FnMut(u64) -> f64,
{
    if values.is_empty() {
        return fetch(0);
    }
    if values.len() == 1 {
        return values[0];
    }

    // Fast path: exactly 8 local leaves reduces via the fixed expression
    // tree used by the engine's subtree shortcut.
    if values.len() == 8 {
        let exact: &[f64; 8] = values.try_into().expect("length checked above");
        return accumulate_local_8subtree(exact);
    }

    let _ = &mut fetch;

    let mut level: Vec<f64> = values.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut i = 0;
        while i + 1 < level.len() {
            next.push(level[i] + level[i + 1]);
            i += 2;
        }
        if i < level.len() {
            // Dangling element: carried forward untouched.
            next.push(level[i]);
        }
        level = next;
    }

    level[0]
}

/// Reference oracle for subtree sums over a power-of-two-length run:
/// recursively split in half and add the two halves' sums. For a
/// power-of-two length this associates additions in exactly the same
/// order as the iterative level-by-level pass in [`accumulate_range`], so
/// the two must agree bit-for-bit (spec.md 8 Invariant 5; spec.md 9
/// "the recursive form exists only as a reference oracle for equivalence
/// tests"). Not used on any hot path.
#[cfg(test)]
fn recursive_reference_sum(values: &[f64]) -> f64 {
    if values.len() == 1 {
        return values[0];
    }
    let half = values.len() / 2;
    recursive_reference_sum(&values[..half]) + recursive_reference_sum(&values[half..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;

    proptest! {
        /// spec.md 8 Invariant 5: the iterative kernel and the recursive
        /// reference definition agree exactly for any power-of-two-sized
        /// local run.
        #[test]
        fn invariant_5_kernel_matches_recursive_oracle(
            values in vec(-1.0e6f64..1.0e6f64, 16)
        ) {
            let iterative = accumulate_range(&values, |_| unreachable!());
            let recursive = recursive_reference_sum(&values);
            prop_assert_eq!(iterative, recursive);
        }

        #[test]
        fn invariant_5_kernel_matches_recursive_oracle_small(
            values in vec(-1.0e6f64..1.0e6f64, 4)
        ) {
            let iterative = accumulate_range(&values, |_| unreachable!());
            let recursive = recursive_reference_sum(&values);
            prop_assert_eq!(iterative, recursive);
        }
    }

    #[test]
    fn eight_leaf_fast_path_matches_naive_sum() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let naive: f64 = values.iter().sum();
        assert_eq!(accumulate_local_8subtree(&values), naive);
    }

    #[test]
    fn eight_leaf_fast_path_is_deterministic_association() {
        // The expression tree must always associate the same way,
        // regardless of the magnitude spread of the inputs.
        let values = [1e10, 1.0, -1e10, 2.0, 3.0, -2.0, 4.0, -4.0];
        let expected = ((values[0] + values[1]) + (values[2] + values[3]))
            + ((values[4] + values[5]) + (values[6] + values[7]));
        assert_eq!(accumulate_local_8subtree(&values), expected);
    }

    #[test]
    fn accumulate_range_single_value_is_identity() {
        assert_eq!(accumulate_range(&[42.0], |_| unreachable!()), 42.0);
    }

    #[test]
    fn accumulate_range_handles_odd_length_without_fetch() {
        let values = [1.0, 2.0, 3.0];
        let result = accumulate_range(&values, |_| unreachable!("no fetch needed"));
        assert_eq!(result, 6.0);
    }

    #[test]
    fn accumulate_range_matches_naive_sum_for_powers_of_two() {
        for len in [2usize, 4, 16, 32] {
            let values: Vec<f64> = (0..len).map(|i| (i + 1) as f64).collect();
            let naive: f64 = values.iter().sum();
            let result = accumulate_range(&values, |_| unreachable!());
            assert_eq!(result, naive);
        }
    }

    #[test]
    fn eight_leaf_path_reached_through_accumulate_range() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let via_range = accumulate_range(&values, |_| unreachable!());
        assert_eq!(via_range, accumulate_local_8subtree(&values));
    }
}
