//! Distribution simulator: no MPI ranks are started here, this only
//! evaluates the planner's cost model. Grounded in
//! `original_source/src/tree_simulations.cpp`.
//!
//! ```text
//! sim <n> <ranks> <variance>
//! ```

use clap::Parser;
use treesum::Distribution;

#[derive(Parser, Debug)]
#[command(name = "sim")]
#[command(about = "Evaluate and compare distribution strategies for a given (n, ranks)")]
struct Args {
    /// Number of summands.
    n: u64,

    /// Number of ranks to simulate.
    ranks: u64,

    /// Variance parameter for the `lsb_cleared` strategy under comparison.
    variance: f64,
}

fn print_distribution(label: &str, d: &Distribution) {
    println!("{label}: score={:.6}", d.score());
    println!(
        "  n_summands={:?} rank_intersection_count={}",
        d.n_summands(),
        d.rank_intersection_count()
    );
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.n == 0 || args.ranks == 0 {
        anyhow::bail!("zero ranks or summands makes no sense");
    }

    let even = Distribution::even(args.n, args.ranks)?;
    let optimized = Distribution::lsb_cleared(args.n, args.ranks, args.variance)?;

    print_distribution("even", &even);
    print_distribution("optimized", &optimized);

    // Sweep variance from 1.0 down towards 0.0, keeping the best score
    // seen so far, mirroring the reference implementation's simulation
    // driver exactly (it does not stop early at a local minimum here --
    // that early-stopping behaviour lives in `Distribution::optimal`).
    let mut best: Option<(Distribution, f64)> = None;
    let mut tested_variance = 1.0f64;
    while tested_variance > 0.0 {
        let generated = Distribution::lsb_cleared(args.n, args.ranks, tested_variance)?;
        let score = generated.score();
        let is_better = match &best {
            Some((_, best_score)) => score < *best_score,
            None => true,
        };
        if is_better {
            best = Some((generated, score));
        }
        tested_variance -= 0.001;
    }

    if let Some((candidate, _)) = best {
        println!("best optimization:");
        print_distribution("candidate", &candidate);
    }

    Ok(())
}
