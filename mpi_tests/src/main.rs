mod protocol;

use mpi::traits::*;
use protocol::{
    test_rank_lookup_agreement, test_tree_matches_allreduce_on_power_of_two,
    test_tree_matches_naive_sum_across_rank_counts,
};

fn main() {
    let universe = mpi::initialize().unwrap();
    let world = universe.world();
    let rank = world.rank();

    if rank == 0 {
        println!("Running treesum protocol tests across {} ranks", world.size());
    }

    test_tree_matches_naive_sum_across_rank_counts(&world);
    if rank == 0 {
        println!("tree matches naive sum: ok");
    }

    test_tree_matches_allreduce_on_power_of_two(&world);
    if rank == 0 {
        println!("tree matches allreduce: ok");
    }

    test_rank_lookup_agreement(&world);
    if rank == 0 {
        println!("rank lookup agreement: ok");
    }
}
