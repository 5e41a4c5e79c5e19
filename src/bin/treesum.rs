//! CLI driver for the tree-summation core (spec.md 6, "Driver contract").
//!
//! Parses the flags below, builds the requested [`treesum::Strategy`], runs
//! it `-r` times, and prints the documented `sum=`/`durations=`/`avg=`/
//! `stddev=` lines on rank 0.
//!
//! ```text
//! treesum -f PATH [--allreduce|--baseline|--tree|--reproblas] [-r N]
//!         [-c MODE] [-n N] [-m M] [-v] [-d RANK]
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use mpi::traits::*;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

use treesum::distribution::Distribution;
use treesum::strategy::{Allreduce, Baseline, ReproBlas, Strategy, SummationStrategy, Tree};

#[derive(Parser, Debug)]
#[command(name = "treesum")]
#[command(about = "Deterministic distributed reduction over a fixed binary accumulation tree")]
struct Args {
    /// Path to a .psllh or .binpsllh input file.
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Use the naive gather-and-sum baseline instead of the tree strategy.
    #[arg(long)]
    baseline: bool,

    /// Use a single MPI_Allreduce instead of the tree strategy.
    #[arg(long)]
    allreduce: bool,

    /// Use the tree-summation strategy (default).
    #[arg(long)]
    tree: bool,

    /// Use the reproducible-BLAS-style compensated-summation baseline.
    #[arg(long)]
    reproblas: bool,

    /// Number of repetitions to time.
    #[arg(short = 'r', long = "repetitions", default_value_t = 1)]
    repetitions: u32,

    /// Distribution mode: "even", "optimal", "optimized,<variance>", or
    /// "manual,n0,n1,...".
    #[arg(short = 'c', long = "distribution", default_value = "even")]
    distribution: String,

    /// Override the total number of summands (must divide the file's
    /// contents evenly; defaults to the file's own entry count).
    #[arg(short = 'n', long = "n")]
    n: Option<u64>,

    /// Cap the number of ranks used. This driver has no live
    /// communicator-split path, so a value other than the rank count the
    /// process was actually launched with (`mpirun -np`) is rejected rather
    /// than silently ignored.
    #[arg(short = 'm', long = "m")]
    m: Option<u64>,

    /// Verbose logging (tracing at INFO instead of WARN).
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Attach-a-debugger stub: write the PID to /tmp/treesum_debug.pid and
    /// spin until the flag file is removed, but only on the given rank.
    #[arg(short = 'd', long = "debug-rank")]
    debug_rank: Option<i32>,
}

fn init_tracing(verbose: bool) {
    let level_filter = if verbose { LevelFilter::INFO } else { LevelFilter::WARN };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("TREESUM_LOG")
        .from_env_lossy();

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .compact(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Writes the process PID to a well-known path and spin-waits, so an
/// operator can attach a debugger to a specific rank mid-run. Grounded in
/// `original_source/src/summation/util.cpp`'s `Util::attach_debugger`.
fn attach_debugger(rank: i32, debug_rank: Option<i32>) {
    if debug_rank != Some(rank) {
        return;
    }

    let pid_path = "/tmp/treesum_debug.pid";
    let pid = std::process::id();
    if std::fs::write(pid_path, pid.to_string()).is_ok() {
        eprintln!("rank {rank} waiting for debugger attach, pid={pid} ({pid_path})");
        while std::path::Path::new(pid_path).exists() {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }
}

fn average(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

fn stddev(samples: &[f64]) -> f64 {
    let mean = average(samples);
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}

fn build_distribution(mode: &str, n: u64, ranks: u64) -> anyhow::Result<Distribution> {
    let mut parts = mode.splitn(2, ',');
    let kind = parts.next().unwrap_or("even");

    let distribution = match kind {
        "even" => Distribution::even(n, ranks)?,
        "optimal" => Distribution::optimal(n, ranks)?,
        "optimized" => {
            let variance: f64 = parts
                .next()
                .context("optimized mode requires a variance, e.g. optimized,0.5")?
                .parse()
                .context("variance must be a floating point number")?;
            Distribution::lsb_cleared(n, ranks, variance)?
        }
        "manual" => {
            let counts = parts.next().context("manual mode requires counts, e.g. manual,3,2,4")?;
            Distribution::manual(n, ranks, counts)?
        }
        other => bail!("unknown distribution mode '{other}'"),
    };

    Ok(distribution)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let universe = mpi::initialize().context("failed to initialize MPI")?;
    let world = universe.world();
    let rank = world.rank();
    let cluster_size = world.size();

    attach_debugger(rank, args.debug_rank);

    let code = run(&args, &world, rank, cluster_size);
    match code {
        Ok(()) => Ok(()),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(255);
        }
    }
}

fn run(
    args: &Args,
    world: &mpi::topology::SystemCommunicator,
    rank: i32,
    cluster_size: i32,
) -> anyhow::Result<()> {
    if let Some(m) = args.m {
        if m == 0 {
            bail!("-m must be a positive rank-cluster cap");
        }
        if m != cluster_size as u64 {
            bail!(
                "-m {m} requested but this run was launched with {cluster_size} ranks; \
                 capping the active rank count requires relaunching under mpirun with \
                 `-np {m}` (this driver has no live communicator-split path, so it \
                 refuses rather than silently running on the full {cluster_size})"
            );
        }
    }

    let all_values = if rank == 0 {
        Some(treesum::io::read_summands(&args.file).context("reading input file")?)
    } else {
        None
    };

    let n = match (args.n, &all_values) {
        (Some(n), _) => n,
        (None, Some(values)) => values.len() as u64,
        (None, None) => 0,
    };
    let mut n = n;
    world.process_at_rank(0).broadcast_into(&mut n);

    let distribution = build_distribution(&args.distribution, n, cluster_size as u64)?;
    info!(n = distribution.n(), ranks = cluster_size, "built distribution");

    let local_count = distribution.n_summands()[rank as usize] as usize;
    let start = distribution.start_indices()[rank as usize] as usize;

    let local_values: Vec<f64> = if rank == 0 {
        let values = all_values.expect("rank 0 always reads the file");
        let root_slice = values[start..start + local_count].to_vec();
        for r in 1..cluster_size {
            let r_start = distribution.start_indices()[r as usize] as usize;
            let r_count = distribution.n_summands()[r as usize] as usize;
            world
                .process_at_rank(r)
                .send_with_tag(&values[r_start..r_start + r_count], 0);
        }
        root_slice
    } else {
        let (values, _status) = world.process_at_rank(0).receive_vec::<f64>();
        values
    };

    let strategy = match (args.baseline, args.allreduce, args.reproblas) {
        (true, false, false) => Strategy::Baseline(Baseline::new(rank, world)),
        (false, true, false) => Strategy::Allreduce(Allreduce::new(world)),
        (false, false, true) => Strategy::ReproBlas(ReproBlas::new(world)),
        (false, false, false) => Strategy::Tree(Tree::new(rank, world, distribution)?),
        _ => bail!("at most one of --tree/--allreduce/--baseline/--reproblas may be given"),
    };

    let mut durations = Vec::with_capacity(args.repetitions as usize);
    let mut sum = 0.0;
    for _ in 0..args.repetitions {
        let started = Instant::now();
        sum = strategy.accumulate(&local_values)?;
        world.barrier();
        durations.push(started.elapsed().as_secs_f64() * 1e6);
    }

    if rank == 0 {
        println!("sum={sum:.64}");
        let rendered: Vec<String> = durations.iter().map(|d| format!("{d:.3}")).collect();
        println!("durations={}", rendered.join(","));
        println!("avg={:.3}", average(&durations));
        println!("stddev={:.3}", stddev(&durations));
    }

    Ok(())
}
