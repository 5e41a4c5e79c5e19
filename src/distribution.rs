//! The distribution planner (spec.md 4.B): partitions `n` summands across
//! `ranks` processes so as to minimise a simple communication/compute cost
//! model, without changing the bit-for-bit result the tree reduction
//! produces (spec.md Invariant 4 — the result is independent of the chosen
//! distribution).

use crate::error::SummationError;
use crate::tree::parent_unchecked;

/// Reference engineering constants for the cost model, grounded in
/// `original_source/src/summation/distribution.cpp`'s `score()`.
pub const DEFAULT_T_SEND: f64 = 110e-9;
pub const DEFAULT_T_ADD: f64 = 2.44e-9;

/// A partition of `n` summands across `ranks` processes.
///
/// `start_indices` is the exclusive prefix sum of `n_summands`; rank `r`
/// owns the half-open range `[start_indices[r], start_indices[r] +
/// n_summands[r])`. The rank-intersection count is cached lazily, mirroring
/// the `mutable` cache field on the original C++ `Distribution`.
#[derive(Debug, Clone)]
pub struct Distribution {
    n: u64,
    n_summands: Vec<u64>,
    start_indices: Vec<u64>,
    t_send: f64,
    t_add: f64,
    rank_intersection_count: std::cell::Cell<Option<u64>>,
}

impl Distribution {
    fn from_counts(n: u64, n_summands: Vec<u64>) -> Self {
        let mut start_indices = Vec::with_capacity(n_summands.len());
        let mut index = 0u64;
        for &count in &n_summands {
            start_indices.push(index);
            index += count;
        }
        Distribution {
            n,
            n_summands,
            start_indices,
            t_send: DEFAULT_T_SEND,
            t_add: DEFAULT_T_ADD,
            rank_intersection_count: std::cell::Cell::new(None),
        }
    }

    /// Override the cost model's engineering constants (spec.md 9, Open
    /// Question 2: leave `t_send`/`t_add` configurable rather than baked
    /// into `score`).
    pub fn with_cost_model(mut self, t_send: f64, t_add: f64) -> Self {
        self.t_send = t_send;
        self.t_add = t_add;
        self
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn ranks(&self) -> usize {
        self.n_summands.len()
    }

    pub fn n_summands(&self) -> &[u64] {
        &self.n_summands
    }

    pub fn start_indices(&self) -> &[u64] {
        &self.start_indices
    }

    /// Even split: `n_summands[r] = floor(n / ranks) + (1 if r < n mod
    /// ranks else 0)`; the remainder lands on the first few ranks.
    pub fn even(n: u64, ranks: u64) -> Result<Self, SummationError> {
        validate_shape(n, ranks)?;

        let per_rank = n / ranks;
        let remainder = n % ranks;

        let n_summands = (0..ranks)
            .map(|r| if r < remainder { per_rank + 1 } else { per_rank })
            .collect();

        Ok(Self::from_counts(n, n_summands))
    }

    /// Even split with the remainder on the last few ranks instead of the
    /// first.
    pub fn even_remainder_on_last(n: u64, ranks: u64) -> Result<Self, SummationError> {
        validate_shape(n, ranks)?;

        let per_rank = n / ranks;
        let remainder = n % ranks;

        let n_summands = (0..ranks)
            .map(|r| {
                if r == ranks - 1 {
                    per_rank + remainder
                } else {
                    per_rank
                }
            })
            .collect();

        Ok(Self::from_counts(n, n_summands))
    }

    /// Greedy, tree-aligned split (spec.md 4.B strategy 3). Each rank
    /// boundary after the fair `start(r-1) + floor(n/ranks)` candidate is
    /// walked up towards its tree-parent (clearing the lowest set bit) as
    /// long as the relative deviation from the fair share stays within
    /// `variance`, so that rank boundaries land on large power-of-two
    /// subtree edges and minimise the number of rank-intersecting summands.
    pub fn lsb_cleared(n: u64, ranks: u64, variance: f64) -> Result<Self, SummationError> {
        validate_shape(n, ranks)?;
        if !(0.0 < variance && variance <= 1.0) {
            return Err(SummationError::BadDistribution {
                reason: format!("variance {variance} must lie in (0, 1]"),
            });
        }

        let fair_share = n / ranks;
        let ranks = ranks as usize;

        let mut start_indices = vec![0u64; ranks];
        let mut n_summands = vec![0u64; ranks];

        for r in 1..ranks {
            let last_index = start_indices[r - 1];

            let mut proposed_index = last_index + fair_share;
            let mut index = proposed_index;

            while last_index < proposed_index
                && variance_within_bounds(proposed_index - last_index, fair_share, variance)
            {
                index = proposed_index;
                proposed_index = parent_unchecked(index);
            }

            start_indices[r] = index;
            n_summands[r - 1] = index - last_index;
        }

        // Clamp: the remainder always lands on the last rank, and can never
        // go negative even for small n/ranks (spec.md 9, Open Question 3).
        n_summands[ranks - 1] = n.saturating_sub(start_indices[ranks - 1]);

        let mut d = Distribution {
            n,
            n_summands,
            start_indices,
            t_send: DEFAULT_T_SEND,
            t_add: DEFAULT_T_ADD,
            rank_intersection_count: std::cell::Cell::new(None),
        };
        d.n = n;
        Ok(d)
    }

    /// Sweep `variance` over `(0, 1)` at a fixed step, scoring each
    /// candidate `lsb_cleared` distribution, and stop at the first strict
    /// local minimum (spec.md 4.B strategy 4; Design Notes, Open Question
    /// 2).
    pub fn optimal(n: u64, ranks: u64) -> Result<Self, SummationError> {
        const STEP: f64 = 1e-4;

        validate_shape(n, ranks)?;

        let mut best: Option<(Distribution, f64)> = None;
        let mut variance = 1.0;

        while variance > 0.0 {
            let candidate = Distribution::lsb_cleared(n, ranks, variance)?;
            let score = candidate.score();

            match &best {
                Some((_, best_score)) if score >= *best_score => {
                    // First strict increase after at least one decrease:
                    // stop at the local minimum we already have.
                    break;
                }
                _ => best = Some((candidate, score)),
            }

            variance -= STEP;
        }

        Ok(best
            .map(|(d, _)| d)
            .unwrap_or(Distribution::lsb_cleared(n, ranks, STEP)?))
    }

    /// Parse a manual, comma-separated partition (`-c manual,n0,n1,...`).
    /// Accepted only if the counts sum to `n` and there are exactly `ranks`
    /// of them.
    pub fn manual(n: u64, ranks: u64, counts_csv: &str) -> Result<Self, SummationError> {
        let n_summands: Vec<u64> = counts_csv
            .split(',')
            .map(|tok| {
                tok.trim().parse::<u64>().map_err(|_| SummationError::BadDistribution {
                    reason: format!("'{tok}' is not a non-negative integer"),
                })
            })
            .collect::<Result<_, _>>()?;

        if n_summands.len() as u64 != ranks {
            return Err(SummationError::BadDistribution {
                reason: format!(
                    "manual distribution has {} counts, expected {ranks}",
                    n_summands.len()
                ),
            });
        }

        let sum: u64 = n_summands.iter().sum();
        if sum != n {
            return Err(SummationError::BadDistribution {
                reason: format!("manual distribution sums to {sum}, expected {n}"),
            });
        }
        if n_summands.first().copied().unwrap_or(0) == 0 {
            return Err(SummationError::BadDistribution {
                reason: "rank 0 must be non-empty; it broadcasts the final sum".to_string(),
            });
        }

        Ok(Self::from_counts(n, n_summands))
    }

    /// Add `x`'s own lowest set bit back to itself (spec.md 8 S5; grounded
    /// in `original_source/test/distribution_tests.cpp`'s `RoundingUp`
    /// test: `round_up(23) == 24`, `round_up(24) == 32`). This is *not*
    /// rounding to the next power of two -- it rounds up to the next
    /// boundary aligned with `x`'s own subtree size.
    pub fn round_up(x: u64) -> u64 {
        x + (x & x.wrapping_neg())
    }

    /// Exact count of rank-intersecting summands across every non-root
    /// rank: for rank `r`'s range `[start(r), start(r)+n_r)`, an index `i`
    /// is counted if `parent(i) < start(r)` (spec.md 4.B, 8 Invariant 6).
    pub fn rank_intersection_count(&self) -> u64 {
        if let Some(cached) = self.rank_intersection_count.get() {
            return cached;
        }

        let mut total = 0u64;
        for r in 1..self.n_summands.len() {
            let start = self.start_indices[r];
            let end = start + self.n_summands[r];

            // Index 0 has no parent and is never rank-intersecting.
            let first = if start == 0 { 1 } else { start };
            for index in first..end {
                if parent_unchecked(index) < start {
                    total += 1;
                }
            }
        }

        self.rank_intersection_count.set(Some(total));
        total
    }

    /// Cost-model score: communication cost (one send per rank-intersecting
    /// summand) plus the compute cost of the slowest rank's local
    /// reduction. Used for ranking distributions, not for correctness.
    pub fn score(&self) -> f64 {
        let max_n = self.n_summands.iter().copied().max().unwrap_or(0);
        self.t_send * self.rank_intersection_count() as f64 + max_n as f64 * self.t_add
    }
}

fn validate_shape(n: u64, ranks: u64) -> Result<(), SummationError> {
    if ranks == 0 {
        return Err(SummationError::BadDistribution {
            reason: "cluster size must be positive".to_string(),
        });
    }
    if n == 0 {
        return Err(SummationError::BadDistribution {
            reason: "cannot distribute zero summands".to_string(),
        });
    }
    Ok(())
}

fn variance_within_bounds(actual_length: u64, intended_length: u64, variance: f64) -> bool {
    let proportion = actual_length as f64 / intended_length as f64;
    variance <= proportion
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// spec.md 8 Invariant 2: for every distribution produced by any
        /// strategy, counts sum to `n` and `start_indices` is the exclusive
        /// prefix sum of `n_summands`.
        #[test]
        fn invariant_2_counts_sum_and_prefix_sum(n in 1u64..5000, ranks in 1u64..33) {
            for d in [
                Distribution::even(n, ranks).unwrap(),
                Distribution::even_remainder_on_last(n, ranks).unwrap(),
                Distribution::lsb_cleared(n, ranks, 0.5).unwrap(),
            ] {
                prop_assert_eq!(d.n_summands().iter().sum::<u64>(), n);
                prop_assert_eq!(d.n_summands().len(), ranks as usize);
                prop_assert_eq!(d.start_indices().len(), ranks as usize);

                let mut acc = 0u64;
                for (i, &count) in d.n_summands().iter().enumerate() {
                    prop_assert_eq!(d.start_indices()[i], acc);
                    acc += count;
                }
            }
        }

        /// spec.md 8 Invariant 6: `rank_intersection_count` (computed fresh,
        /// bypassing the cache) matches a direct count over every rank's
        /// range.
        #[test]
        fn invariant_6_rank_intersection_count_matches_direct_scan(
            n in 1u64..2000, ranks in 1u64..17
        ) {
            let d = Distribution::even(n, ranks).unwrap();

            let mut expected = 0u64;
            for r in 1..d.ranks() {
                let start = d.start_indices()[r];
                let end = start + d.n_summands()[r];
                let first = if start == 0 { 1 } else { start };
                for index in first..end {
                    if parent_unchecked(index) < start {
                        expected += 1;
                    }
                }
            }

            prop_assert_eq!(d.rank_intersection_count(), expected);
        }
    }

    #[test]
    fn even_remainder_on_first_ranks() {
        let d = Distribution::even(10, 3).unwrap();
        assert_eq!(d.n_summands(), &[4, 3, 3]);
        assert_eq!(d.start_indices(), &[0, 4, 7]);
    }

    #[test]
    fn even_remainder_on_last_ranks() {
        let d = Distribution::even_remainder_on_last(10, 3).unwrap();
        assert_eq!(d.n_summands(), &[3, 3, 4]);
    }

    #[test]
    fn lsb_cleared_power_of_two_is_exact() {
        let d = Distribution::lsb_cleared(1024, 4, 1.0).unwrap();
        assert_eq!(d.n_summands(), &[256, 256, 256, 256]);
    }

    #[test]
    fn round_up_matches_reference() {
        assert_eq!(Distribution::round_up(23), 24);
        assert_eq!(Distribution::round_up(24), 32);
        assert_eq!(Distribution::round_up(1), 2);
        assert_eq!(Distribution::round_up(2), 4);
        assert_eq!(Distribution::round_up(3), 4);
    }

    #[test]
    fn manual_rejects_mismatched_sum() {
        let err = Distribution::manual(8, 3, "3,2,2").unwrap_err();
        assert!(matches!(err, SummationError::BadDistribution { .. }));
    }

    #[test]
    fn manual_accepts_matching_partition() {
        let d = Distribution::manual(8, 3, "3,2,3").unwrap();
        assert_eq!(d.n_summands(), &[3, 2, 3]);
        assert_eq!(d.start_indices(), &[0, 3, 5]);
    }

    #[test]
    fn invariants_sum_and_prefix_sum() {
        for (n, ranks) in [(8u64, 3u64), (30, 4), (1, 1), (17, 5)] {
            let d = Distribution::even(n, ranks).unwrap();
            assert_eq!(d.n_summands().iter().sum::<u64>(), d.n());
            let mut acc = 0u64;
            for (i, &count) in d.n_summands().iter().enumerate() {
                assert_eq!(d.start_indices()[i], acc);
                acc += count;
            }
        }
    }

    #[test]
    fn zero_summands_is_bad_distribution() {
        assert!(matches!(
            Distribution::even(0, 3),
            Err(SummationError::BadDistribution { .. })
        ));
    }
}
