use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use trackmaster::master::load_segments;
use trackmaster::{
    ClientConfig, Master, MasterConfig, MasterError, Result, TrackClient, WorkerConfig,
    WorkerLossPolicy,
};
use trackreduce::{
    chunk_size, map_chunks_parallel, reduce, split_route, ClientId, HaversineCalculator,
    JsonTrackParser, Route, RouteId, TrackParser, UserStatistics,
};

#[derive(Parser, Debug)]
#[command(about = "Distributed map/reduce statistics for GPS tracks")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the coordinator
    Master {
        /// JSON configuration file; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        client_addr: Option<SocketAddr>,

        #[arg(long)]
        worker_addr: Option<SocketAddr>,

        /// In-process workers to start
        #[arg(long)]
        workers: Option<usize>,

        /// Directory of segment definitions
        #[arg(long)]
        segments: Option<PathBuf>,

        /// Seconds to wait for a worker when none is connected (0 = fail immediately)
        #[arg(long)]
        worker_wait_secs: Option<u64>,

        /// Leave routes unreduced when a worker disconnects instead of failing them
        #[arg(long)]
        stall_on_worker_loss: bool,
    },

    /// Run a worker connected to a coordinator
    Worker {
        /// Coordinator configuration file to take the worker address from
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        master: Option<SocketAddr>,
    },

    /// Submit one track file, or every file in the track directory
    Submit {
        /// Coordinator configuration file to take the client address and track directory from
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        master: Option<SocketAddr>,

        #[arg(long)]
        track_dir: Option<PathBuf>,

        file: Option<PathBuf>,
    },

    /// Compute statistics of one track locally
    Process {
        file: PathBuf,

        /// Virtual worker count used for chunking
        #[arg(long, default_value_t = 4)]
        workers: usize,

        #[arg(long)]
        segments: Option<PathBuf>,

        #[arg(long, default_value_t = trackreduce::calculator::DEFAULT_SEGMENT_TOLERANCE)]
        tolerance: f64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Master {
            config,
            client_addr,
            worker_addr,
            workers,
            segments,
            worker_wait_secs,
            stall_on_worker_loss,
        } => {
            let mut config = master_config(config.as_deref())?;
            if let Some(addr) = client_addr {
                config.client_addr = addr;
            }
            if let Some(addr) = worker_addr {
                config.worker_addr = addr;
            }
            if let Some(n) = workers {
                config.worker_pool_size = n;
            }
            if segments.is_some() {
                config.segment_dir = segments;
            }
            if worker_wait_secs.is_some() {
                config.failure.worker_wait_secs = worker_wait_secs;
            }
            if stall_on_worker_loss {
                config.failure.on_worker_loss = WorkerLossPolicy::Stall;
            }

            Master::new(config)?.bind().await?.wait().await
        }

        Command::Worker { config, master } => {
            let mut worker = WorkerConfig::from_master(&master_config(config.as_deref())?);
            if let Some(addr) = master {
                worker.master_addr = addr;
            }
            trackmaster::worker::run(worker).await
        }

        Command::Submit {
            config,
            master,
            track_dir,
            file,
        } => {
            let mut client = ClientConfig::from_master(&master_config(config.as_deref())?);
            if let Some(addr) = master {
                client.master_addr = addr;
            }
            if let Some(dir) = track_dir {
                client.track_dir = dir;
            }
            let client = TrackClient::new(client);
            match file {
                Some(path) => {
                    let report = client.submit(&path).await?;
                    print_report(&report);
                    Ok(())
                }
                None => {
                    let results = client.submit_all().await?;
                    let total = results.len();
                    let mut failed = 0;
                    for (path, outcome) in results {
                        match outcome {
                            Ok(report) => print_report(&report),
                            Err(e) => {
                                failed += 1;
                                log::error!("[Client] {}: {}", path.display(), e);
                            }
                        }
                    }
                    if failed > 0 {
                        return Err(MasterError::SubmissionsFailed { failed, total });
                    }
                    Ok(())
                }
            }
        }

        Command::Process {
            file,
            workers,
            segments,
            tolerance,
        } => process(&file, workers, segments.as_deref(), tolerance),
    }
}

/// Defaults, or the given coordinator configuration file.
fn master_config(path: Option<&Path>) -> Result<MasterConfig> {
    match path {
        Some(path) => MasterConfig::load(path),
        None => Ok(MasterConfig::default()),
    }
}

fn process(file: &Path, workers: usize, segment_dir: Option<&Path>, tolerance: f64) -> Result<()> {
    let segments = match segment_dir {
        Some(dir) => load_segments(dir, &JsonTrackParser)?,
        None => Vec::new(),
    };
    let calculator = HaversineCalculator::new(segments, tolerance);

    let contents = std::fs::read_to_string(file)?;
    let track = JsonTrackParser.parse(&contents)?;
    let route = Route::new(RouteId(1), ClientId(0), track.user, track.waypoints)?;

    let n = chunk_size(route.waypoints.len(), workers)?;
    let chunks = split_route(&route, n)?;
    let partials = map_chunks_parallel(&chunks, &calculator);
    let stats = reduce(route.id, &partials)?;

    let mut user = UserStatistics::new(route.user.clone());
    user.register_route(&stats);
    log::info!(
        "Processed {} waypoints in {} chunks of {}",
        route.waypoints.len(),
        chunks.len(),
        n
    );
    println!("{}", stats);
    println!("{}", user);
    Ok(())
}

fn print_report(report: &trackmaster::RouteReport) {
    println!("{} (route {})", report.file_name, report.route_id);
    println!("{}", report.route);
    println!("{}", report.user);
    println!("{}", report.all_users);
}
