//! `lloyd-mesh` command line.
//!
//! Every rank runs the same command. Rank and world come from the
//! `LLOYD_*` environment variables set by `lloyd-mesh launch` (or by any
//! other process manager); without them the command runs as a single
//! in-process rank.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use lloyd_mesh::{
    launcher::{LaunchPlan, COORDINATOR_ENV, RANK_ENV, TOKEN_ENV, WORLD_SIZE_ENV},
    logging, write_centroids, Classifier, Communicator, DistributedKMeans, EmptyClusterPolicy,
    EngineError, FileDataset, InitStrategy, LocalWorld, RunConfig, RunReport, TcpCommunicator,
    WorldConfig,
};
use std::ffi::OsString;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

/// Where `launch` puts rank 0 unless `--coordinator` says otherwise
const DEFAULT_COORDINATOR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7070));

#[derive(Parser)]
#[command(name = "lloyd-mesh")]
#[command(version)]
#[command(about = "Distributed k-means and nearest-neighbour classification")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    world: WorldArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct WorldArgs {
    /// Rank of this process
    #[arg(long, env = RANK_ENV, global = true)]
    rank: Option<usize>,

    /// Number of processes in the run
    #[arg(long, env = WORLD_SIZE_ENV, global = true)]
    world_size: Option<usize>,

    /// Address the coordinator (rank 0) listens on
    #[arg(long, env = COORDINATOR_ENV, global = true)]
    coordinator: Option<SocketAddr>,

    /// Token shared by the processes of one run
    #[arg(long, env = TOKEN_ENV, global = true, default_value = "", hide_env_values = true)]
    token: String,

    /// Seconds to wait for the other ranks to connect
    #[arg(long, global = true, default_value_t = 30)]
    connect_timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster the dataset with distributed Lloyd's k-means
    Train(TrainArgs),
    /// Find the nearest training record for each query
    Classify(ClassifyArgs),
    /// Start a local process group running another lloyd-mesh command
    Launch(LaunchArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Dataset directory, one record per file
    #[arg(long)]
    data: PathBuf,

    /// Number of clusters
    #[arg(short, long)]
    k: Option<usize>,

    /// Feature vector dimension
    #[arg(long)]
    dim: Option<usize>,

    /// Stop once no centroid moves by this much
    #[arg(long)]
    threshold: Option<f64>,

    /// Iteration cap
    #[arg(long)]
    max_iterations: Option<usize>,

    #[arg(long, value_enum)]
    init: Option<InitArg>,

    /// Seed for random initialisation
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    empty_cluster: Option<EmptyClusterArg>,

    /// JSON run configuration; flags override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Centroid output file
    #[arg(short, long, default_value = "centroids.txt")]
    output: PathBuf,

    /// Optional JSON run report
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args)]
struct ClassifyArgs {
    /// Training dataset directory
    #[arg(long)]
    data: PathBuf,

    /// Feature vector dimension
    #[arg(long)]
    dim: usize,

    /// Query record files
    #[arg(long, required = true, num_args = 1..)]
    query: Vec<PathBuf>,

    /// Print one JSON object per query instead of plain columns
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct LaunchArgs {
    /// Number of processes to start
    #[arg(short, long)]
    workers: usize,

    /// Command for every rank, e.g. `-- train --data DIR --k 3 --dim 2`
    #[arg(last = true, required = true)]
    args: Vec<OsString>,
}

#[derive(Clone, Copy, ValueEnum)]
enum InitArg {
    First,
    Random,
}

impl From<InitArg> for InitStrategy {
    fn from(arg: InitArg) -> Self {
        match arg {
            InitArg::First => InitStrategy::First,
            InitArg::Random => InitStrategy::Random,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum EmptyClusterArg {
    Retain,
    Fail,
}

impl From<EmptyClusterArg> for EmptyClusterPolicy {
    fn from(arg: EmptyClusterArg) -> Self {
        match arg {
            EmptyClusterArg::Retain => EmptyClusterPolicy::RetainPrevious,
            EmptyClusterArg::Fail => EmptyClusterPolicy::Fail,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Train(args) => train(&cli.world, args),
        Commands::Classify(args) => classify(&cli.world, args),
        Commands::Launch(args) => {
            let coordinator = cli.world.coordinator.unwrap_or(DEFAULT_COORDINATOR);
            LaunchPlan::new(args.workers, coordinator, args.args)?.run()
        }
    }
}

impl WorldArgs {
    /// `None` means a single in-process rank
    fn resolve(&self) -> Result<Option<WorldConfig>> {
        let size = match self.world_size {
            None | Some(1) => {
                if self.rank.unwrap_or(0) != 0 {
                    bail!("--rank needs --world-size greater than 1");
                }
                return Ok(None);
            }
            Some(size) => size,
        };
        let rank = self.rank.context("--rank is required when --world-size is set")?;
        let coordinator = self
            .coordinator
            .context("--coordinator is required when --world-size is set")?;

        let world = WorldConfig::new(rank, size, coordinator)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_token(self.token.clone());
        world.validate()?;
        Ok(Some(world))
    }
}

/// Run `job` on this process's rank, over TCP or in-process
fn with_communicator<T, F>(world: &WorldArgs, job: F) -> Result<T>
where
    F: FnOnce(&mut dyn Communicator) -> Result<T, EngineError>,
{
    match world.resolve()? {
        Some(world) => {
            let mut comm = TcpCommunicator::connect(&world)
                .with_context(|| format!("Rank {} failed to join the run", world.rank))?;
            Ok(job(&mut comm)?)
        }
        None => {
            let mut comm = LocalWorld::new(1)?
                .pop()
                .context("in-process world has no rank")?;
            Ok(job(&mut comm)?)
        }
    }
}

fn train(world: &WorldArgs, args: TrainArgs) -> Result<()> {
    let mut config = match (&args.config, args.k, args.dim) {
        (Some(path), _, _) => RunConfig::from_json_file(path)?,
        (None, Some(k), Some(dim)) => RunConfig::new(k, dim),
        (None, _, _) => bail!("--k and --dim are required without --config"),
    };
    if let Some(k) = args.k {
        config.k = k;
    }
    if let Some(dim) = args.dim {
        config.dimension = dim;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(init) = args.init {
        config.init = init.into();
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(policy) = args.empty_cluster {
        config.empty_cluster = policy.into();
    }

    let engine = DistributedKMeans::new(config.clone())?;
    let dataset = FileDataset::open(&args.data)
        .with_context(|| format!("Failed to open dataset {}", args.data.display()))?;

    let start = Instant::now();
    let (is_root, outcome) = with_communicator(world, |comm| {
        let outcome = engine.run(comm, &dataset)?;
        Ok((comm.is_root(), outcome))
    })?;

    if !is_root {
        return Ok(());
    }

    write_centroids(&args.output, &outcome.centroids)?;
    if let Some(path) = &args.report {
        RunReport::new(&config, &outcome).write(path)?;
    }
    info!(
        run_id = %outcome.run_id,
        iterations = outcome.iterations,
        converged = outcome.converged,
        elapsed_ms = start.elapsed().as_millis() as u64,
        output = %args.output.display(),
        "centroids written"
    );
    println!(
        "{} iterations, {}, final displacement {:e}, cluster sizes {:?}",
        outcome.iterations,
        if outcome.converged { "converged" } else { "iteration cap reached" },
        outcome.final_displacement(),
        outcome.cluster_sizes
    );
    Ok(())
}

fn classify(world: &WorldArgs, args: ClassifyArgs) -> Result<()> {
    let dataset = FileDataset::open(&args.data)
        .with_context(|| format!("Failed to open dataset {}", args.data.display()))?;

    let (is_root, answers) = with_communicator(world, |comm| {
        let classifier = Classifier::prepare(comm, &dataset, args.dim)?;
        let mut answers = Vec::with_capacity(args.query.len());
        for path in &args.query {
            answers.push(classifier.classify_file(comm, path)?);
        }
        Ok((comm.is_root(), answers))
    })?;

    if !is_root {
        return Ok(());
    }
    for (query, result) in answers {
        if args.json {
            let line = serde_json::json!({
                "query": query.id,
                "label": result.label,
                "distance": result.distance,
                "neighbor": result.neighbor,
            });
            println!("{}", line);
        } else {
            println!(
                "{}\t{}\t{:.6}\t{}",
                query.id, result.label, result.distance, result.neighbor
            );
        }
    }
    Ok(())
}
