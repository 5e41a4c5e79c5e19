//! Multi-rank protocol tests for [`treesum`], exercised under `mpirun`
//! since `cargo test` alone cannot spawn MPI ranks. Grounded in
//! `parallel_tests/src/sorting.rs`'s `test_sample_sort`: a plain function
//! taking the `Universe`, asserting cross-rank invariants, and panicking
//! on failure rather than returning a `Result`.

use mpi::topology::SystemCommunicator;
use mpi::traits::*;

use treesum::distribution::Distribution;
use treesum::engine::TreeReduction;
use treesum::strategy::{Allreduce, Strategy, SummationStrategy, Tree};

/// Every rank reduces the same `n`-length vector `[1.0, 2.0, ..., n]` and
/// must arrive at the identical sum, regardless of how many ranks are
/// running (spec.md Invariant 1).
pub fn test_tree_matches_naive_sum_across_rank_counts(world: &SystemCommunicator) {
    let rank = world.rank();
    let size = world.size();

    let n: u64 = 997;
    let distribution = Distribution::even(n, size as u64).expect("valid distribution");
    let start = distribution.start_indices()[rank as usize] as usize;
    let count = distribution.n_summands()[rank as usize] as usize;

    let values: Vec<f64> = (0..n).map(|i| (i + 1) as f64).collect();
    let local = values[start..start + count].to_vec();

    let expected: f64 = values.iter().sum();

    let strategy = Strategy::Tree(Tree::new(rank, world, distribution).expect("valid engine"));
    let sum = strategy.accumulate(&local).expect("accumulate succeeds");

    assert!(
        (sum - expected).abs() < 1e-6,
        "rank {rank}: tree sum {sum} != naive sum {expected}"
    );
}

/// The tree strategy and the `Allreduce` baseline must agree bit-for-bit
/// on input that both strategies associate identically (a power-of-two
/// count evenly split), confirming the tree isn't silently dropping or
/// duplicating values (spec.md Scenario S4).
pub fn test_tree_matches_allreduce_on_power_of_two(world: &SystemCommunicator) {
    let rank = world.rank();
    let size = world.size();

    let n: u64 = 512;
    let distribution = Distribution::even(n, size as u64).expect("valid distribution");
    let start = distribution.start_indices()[rank as usize] as usize;
    let count = distribution.n_summands()[rank as usize] as usize;

    let values: Vec<f64> = (0..n).map(|i| 2.0_f64.powi(i as i32 % 17)).collect();
    let local = values[start..start + count].to_vec();

    let tree_strategy =
        Strategy::Tree(Tree::new(rank, world, distribution.clone()).expect("valid engine"));
    let tree_sum = tree_strategy.accumulate(&local).expect("tree accumulate succeeds");

    let allreduce_strategy = Strategy::Allreduce(Allreduce::new(world));
    let allreduce_sum = allreduce_strategy
        .accumulate(&local)
        .expect("allreduce accumulate succeeds");

    assert_eq!(
        tree_sum, allreduce_sum,
        "rank {rank}: tree {tree_sum} != allreduce {allreduce_sum}"
    );
}

/// The linear-scan and `BTreeMap` rank lookups must agree for every index
/// in range, on every rank (spec.md Invariant 3).
pub fn test_rank_lookup_agreement(world: &SystemCommunicator) {
    let rank = world.rank();
    let size = world.size();

    let n: u64 = 300;
    let distribution = Distribution::lsb_cleared(n, size as u64, 0.8).expect("valid distribution");
    let engine = TreeReduction::new(rank, world, distribution).expect("valid engine");

    for index in 0..n {
        let scan = engine.rank_from_index(index).expect("index in range");
        let via_map = engine.rank_from_index_map(index).expect("index in range");
        assert_eq!(scan, via_map, "index {index} disagreement on rank {rank}");
    }
}
