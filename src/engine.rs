//! The tree reduction engine (spec.md 4.E): drives the local kernel and the
//! message buffer across `accumulate()`, then has the root finish and
//! broadcast the final sum. Grounded in
//! `original_source/src/summation/strategies/binary_tree.cpp`'s
//! `BinaryTreeSummation::accumulate`.

use std::collections::BTreeMap;

use mpi::topology::{Rank, SystemCommunicator};
use mpi::traits::*;

use crate::distribution::Distribution;
use crate::error::SummationError;
use crate::kernel::accumulate_range;
use crate::message_buffer::MessageBuffer;
use crate::tree::{largest_child_unchecked, parent_unchecked, subtree_size_unchecked};

/// Subtree size at or above which the engine flushes its outbound message
/// batch before descending further, so that a large subtree's many
/// internal sends don't all pile up behind a single batch (spec.md 4.E
/// step 2).
const FLUSH_THRESHOLD: u64 = 32;

/// Drives one rank's share of a distributed tree-summation.
pub struct TreeReduction<'c> {
    rank: Rank,
    world: &'c SystemCommunicator,
    distribution: Distribution,
    start: u64,
    end: u64,
    rank_intersecting_summands: Vec<u64>,
}

impl<'c> TreeReduction<'c> {
    pub fn new(
        rank: Rank,
        world: &'c SystemCommunicator,
        distribution: Distribution,
    ) -> Result<Self, SummationError> {
        let r = rank as usize;
        if r >= distribution.ranks() {
            return Err(SummationError::BadDistribution {
                reason: format!(
                    "rank {rank} has no assigned range in a {}-rank distribution",
                    distribution.ranks()
                ),
            });
        }

        let start = distribution.start_indices()[r];
        let end = start + distribution.n_summands()[r];
        let rank_intersecting_summands = Self::calculate_rank_intersecting_summands(start, end);

        Ok(TreeReduction {
            rank,
            world,
            distribution,
            start,
            end,
            rank_intersecting_summands,
        })
    }

    /// Indices in `[start, end)` whose tree-parent lies outside this rank's
    /// own range, i.e. the values this rank must hand upward to another
    /// rank rather than reduce entirely on its own (spec.md 4.E step 1).
    fn calculate_rank_intersecting_summands(start: u64, end: u64) -> Vec<u64> {
        let first = if start == 0 { 1 } else { start };
        (first..end)
            .filter(|&index| parent_unchecked(index) < start)
            .collect()
    }

    pub fn rank_intersecting_summands(&self) -> &[u64] {
        &self.rank_intersecting_summands
    }

    /// Linear-scan lookup of which rank owns `index` (spec.md 9, Open
    /// Question 1's baseline approach).
    pub fn rank_from_index(&self, index: u64) -> Result<Rank, SummationError> {
        let starts = self.distribution.start_indices();
        for r in (0..starts.len()).rev() {
            if index >= starts[r] {
                return Ok(r as Rank);
            }
        }
        Err(SummationError::InvalidIndex {
            index,
            reason: "index does not fall within any rank's range",
        })
    }

    /// `BTreeMap`-backed equivalent of [`Self::rank_from_index`], used only
    /// to cross-check the linear scan in tests (spec.md 8 Invariant 3).
    pub fn rank_from_index_map(&self, index: u64) -> Result<Rank, SummationError> {
        let map: BTreeMap<u64, Rank> = self
            .distribution
            .start_indices()
            .iter()
            .enumerate()
            .map(|(r, &start)| (start, r as Rank))
            .collect();
        map.range(..=index)
            .next_back()
            .map(|(_, &rank)| rank)
            .ok_or(SummationError::InvalidIndex {
                index,
                reason: "index does not fall within any rank's range",
            })
    }

    fn is_local(&self, index: u64) -> bool {
        index >= self.start && index < self.end
    }

    fn is_local_subtree_of_size(&self, expected: u64, index: u64) -> bool {
        let lci = largest_child_unchecked(index);
        subtree_size_unchecked(index) == expected && self.is_local(lci)
    }

    /// Reduce the full `local` slice and any rank-intersecting remote
    /// values into a single sum, identical across all ranks (spec.md 4.E,
    /// Invariant 1).
    ///
    /// `local` must hold exactly this rank's assigned summands, i.e.
    /// `local.len() as u64 == end - start`.
    pub fn accumulate(&self, local: &[f64]) -> Result<f64, SummationError> {
        if local.len() as u64 != self.end - self.start {
            return Err(SummationError::BadDistribution {
                reason: format!(
                    "rank {} was given {} local values, expected {}",
                    self.rank,
                    local.len(),
                    self.end - self.start
                ),
            });
        }

        let mut buffer = MessageBuffer::new(self.world);

        for &summand in &self.rank_intersecting_summands {
            if subtree_size_unchecked(summand) >= FLUSH_THRESHOLD {
                buffer.flush()?;
            }
            let value = self.accumulate_index(summand, local, &mut buffer)?;
            let target = self.rank_from_index(parent_unchecked(summand))?;
            buffer.put(summand, value, target)?;
        }
        buffer.flush()?;
        buffer.wait()?;

        if self.rank == 0 {
            let total = self.accumulate_index(0, local, &mut buffer)?;
            let mut result = total;
            self.world.process_at_rank(0).broadcast_into(&mut result);
            Ok(result)
        } else {
            let mut result = 0.0f64;
            self.world.process_at_rank(0).broadcast_into(&mut result);
            Ok(result)
        }
    }

    /// Fetch the value at `index`: a local read if this rank owns it,
    /// otherwise a blocking receive through `buffer`.
    fn acquire_number(
        &self,
        index: u64,
        local: &[f64],
        buffer: &mut MessageBuffer<'_>,
    ) -> Result<f64, SummationError> {
        if self.is_local(index) {
            Ok(local[(index - self.start) as usize])
        } else {
            let source = self.rank_from_index(index)?;
            buffer.get(index, source)
        }
    }

    /// Reduce the subtree rooted at `index`, fetching any non-local operand
    /// through `buffer`. Mirrors `BinaryTreeSummation::accumulate(uint64_t)`
    /// in the reference implementation, including its `index == 0` special
    /// case: index 0 has no single lowest set bit to pivot on, so its
    /// "children" are every power of two below `global_size` instead of the
    /// usual one-bit-at-a-time expansion (spec.md 4.E / 4.C).
    ///
    /// Whenever `index`'s whole subtree is held locally, the reduction is
    /// handed off entirely to the local kernel's iterative scratch-buffer
    /// pass (spec.md 4.C; Design Notes -- the recursive bit-pivot walk
    /// below exists only to cross rank boundaries, never as the
    /// steady-state hot path for a subtree a rank already owns in full).
    fn accumulate_index(
        &self,
        index: u64,
        local: &[f64],
        buffer: &mut MessageBuffer<'_>,
    ) -> Result<f64, SummationError> {
        if index != 0 {
            let size = subtree_size_unchecked(index);
            if self.is_local_subtree_of_size(size, index) {
                let offset = (index - self.start) as usize;
                let slice = &local[offset..offset + size as usize];
                return Ok(accumulate_range(slice, |j| {
                    unreachable!(
                        "subtree [{index}, {index}+{size}) is fully local, fetch({j}) unreachable"
                    )
                }));
            }
        }

        let mut accumulator = self.acquire_number(index, local, buffer)?;

        if index != 0 && !self.is_local(index) {
            return Ok(accumulator);
        }

        let lsb_index = if index == 0 { 64 } else { index.trailing_zeros() + 1 };
        let n = self.distribution.n();

        for j in 1..lsb_index {
            let zero_position = j - 1;
            let child_index = index | (1u64 << zero_position);
            if child_index < n {
                accumulator += self.accumulate_index(child_index, local, buffer)?;
            }
        }

        Ok(accumulator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distribution_3_2_4() -> Distribution {
        Distribution::manual(9, 3, "3,2,4").unwrap()
    }

    #[test]
    fn rank_from_index_scan_matches_btreemap() {
        let distribution = distribution_3_2_4();
        // Build a standalone reduction purely to exercise the lookup logic;
        // `world` is unused by rank_from_index/_map so any valid reference
        // would do, but constructing one requires an initialized universe.
        // These lookups are therefore validated directly against the
        // distribution's own arrays instead of through TreeReduction.
        let starts = distribution.start_indices();
        let counts = distribution.n_summands();
        for index in 0..distribution.n() {
            let mut expected = 0usize;
            for r in (0..starts.len()).rev() {
                if index >= starts[r] {
                    expected = r;
                    break;
                }
            }
            let mut via_map = std::collections::BTreeMap::new();
            for (r, &s) in starts.iter().enumerate() {
                via_map.insert(s, r);
            }
            let via_map_rank = *via_map.range(..=index).next_back().unwrap().1;
            assert_eq!(expected, via_map_rank);
            let _ = counts;
        }
    }

    #[test]
    fn rank_intersecting_summands_scenario_s2() {
        // N=9 split (3,2,4): rank 1 owns [3,5); summand 3's parent is 2
        // (outside rank 1's range), summand 4's parent is 0 (also
        // outside) -- both are rank-intersecting.
        let start = 3u64;
        let end = 5u64;
        let summands = TreeReduction::calculate_rank_intersecting_summands(start, end);
        assert_eq!(summands, vec![3, 4]);
    }

    #[test]
    fn rank_zero_never_has_rank_intersecting_summands() {
        let summands = TreeReduction::calculate_rank_intersecting_summands(0, 3);
        assert!(summands.is_empty());
    }
}
