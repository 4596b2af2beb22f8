//! Runtime configuration for the worker and coordinator binaries.
//!
//! Each binary parses a `clap` argument struct (with environment variable
//! fallbacks, after loading `.env`) and converts it into a validated config
//! through `TryFrom`. The config structs are what the library types take in
//! their constructors; nothing is read from process-wide state.

use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use geocluster_core::{
    aggregate::Aggregator,
    compute::{KMeansRefiner, Strategy},
    wire::DEFAULT_MAX_FRAME_BYTES,
};
use std::{path::PathBuf, sync::Arc};

/// Default per-shard deadline.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a worker waits for a connected client's request frame.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for fetching an `--input-url` dataset.
pub const DEFAULT_INPUT_TIMEOUT: Duration = Duration::from_secs(30);

/// Clustering strategy as spelled on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Random sampling with replacement.
    Sample,
    /// Iterative k-means refinement.
    Kmeans,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Sample => Self::Sample,
            StrategyArg::Kmeans => Self::KMeans,
        }
    }
}

/// Layout of the coordinator's input file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// `latitude,longitude,category,timestamp` per line.
    Csv,
    /// A JSON array of records.
    Json,
}

/// How the coordinator merges partial results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AggregateMode {
    /// Concatenate every worker's centroids.
    Concat,
    /// Concatenate, then k-means the union down to `--final-k` centroids.
    Recluster,
}

/// Command line for `geocluster-worker`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "geocluster-worker",
    version,
    about = "Serves shard clustering requests over TCP"
)]
pub struct WorkerArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `LISTEN_ADDR`
    #[arg(long, env = "LISTEN_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub listen_addr: String,

    /// Number of centroids computed per shard.
    ///
    /// Environment variable: `CLUSTER_K`
    #[arg(long, env = "CLUSTER_K", default_value_t = 4)]
    pub k: usize,

    /// Clustering strategy run on each shard.
    ///
    /// Environment variable: `CLUSTER_STRATEGY`
    #[arg(long, env = "CLUSTER_STRATEGY", value_enum, default_value_t = StrategyArg::Kmeans)]
    pub strategy: StrategyArg,

    /// Seed for the strategy's random source. Unset means a fresh seed per
    /// request.
    ///
    /// Environment variable: `CLUSTER_SEED`
    #[arg(long, env = "CLUSTER_SEED")]
    pub seed: Option<u64>,

    /// Upper bound on k-means iterations per request.
    ///
    /// Environment variable: `MAX_ITERATIONS`
    #[arg(long, env = "MAX_ITERATIONS", default_value_t = KMeansRefiner::DEFAULT_MAX_ITERATIONS)]
    pub max_iterations: usize,

    /// Largest accepted request frame, in bytes.
    ///
    /// Environment variable: `MAX_FRAME_BYTES`
    #[arg(long, env = "MAX_FRAME_BYTES", default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Seconds to wait for in-flight requests on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Milliseconds a connection may take to deliver its request frame.
    ///
    /// Environment variable: `READ_TIMEOUT_MS`
    #[arg(long, env = "READ_TIMEOUT_MS", default_value_t = 10_000)]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub listen_addr: String,
    pub k: usize,
    pub strategy: Strategy,
    pub seed: Option<u64>,
    pub max_iterations: usize,
    pub max_frame_bytes: usize,
    pub shutdown_timeout: Duration,
    pub read_timeout: Duration,
}

impl WorkerConfig {
    /// Config with defaults for everything but the listen address.
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            k: 4,
            strategy: Strategy::default(),
            seed: None,
            max_iterations: KMeansRefiner::DEFAULT_MAX_ITERATIONS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            shutdown_timeout: Duration::from_secs(3),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl TryFrom<WorkerArgs> for WorkerConfig {
    type Error = anyhow::Error;

    fn try_from(args: WorkerArgs) -> Result<Self, Self::Error> {
        if args.k == 0 {
            bail!("CLUSTER_K must be greater than 0");
        }

        if args.max_frame_bytes == 0 {
            bail!("MAX_FRAME_BYTES must be greater than 0");
        }

        if args.read_timeout_ms == 0 {
            bail!("READ_TIMEOUT_MS must be greater than 0");
        }

        Ok(Self {
            listen_addr: args.listen_addr,
            k: args.k,
            strategy: args.strategy.into(),
            seed: args.seed,
            max_iterations: args.max_iterations,
            max_frame_bytes: args.max_frame_bytes,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            read_timeout: Duration::from_millis(args.read_timeout_ms),
        })
    }
}

/// Settings for one [`Dispatcher`](crate::dispatch::Dispatcher).
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Worker addresses. Shard `i` goes to `endpoints[i % endpoints.len()]`.
    pub endpoints: Vec<String>,
    /// Deadline for one shard, measured from the moment its task may connect.
    pub task_timeout: Duration,
    /// Cap on simultaneous connections. `None` allows one per shard.
    pub max_concurrency: Option<usize>,
    /// Largest accepted response frame, in bytes.
    pub max_frame_bytes: usize,
}

impl DispatchConfig {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            max_concurrency: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    #[must_use]
    pub const fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    #[must_use]
    pub const fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }
}

/// Command line for `geocluster-coordinator`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "geocluster-coordinator",
    version,
    about = "Partitions a record file across geocluster workers and aggregates their centroids"
)]
pub struct CoordinatorArgs {
    /// Worker addresses, comma separated.
    ///
    /// Environment variable: `WORKER_ADDRS`
    #[arg(long, env = "WORKER_ADDRS", value_delimiter = ',', required = true)]
    pub workers: Vec<String>,

    /// Number of shards. Defaults to the number of workers; extra shards are
    /// assigned to workers round-robin.
    ///
    /// Environment variable: `NUM_SHARDS`
    #[arg(long, env = "NUM_SHARDS")]
    pub shards: Option<usize>,

    /// Path of the input record file.
    ///
    /// Environment variable: `INPUT_PATH`
    #[arg(long, env = "INPUT_PATH", conflicts_with = "input_url")]
    pub input: Option<PathBuf>,

    /// HTTP(S) URL serving the records as CSV, instead of `--input`.
    ///
    /// Environment variable: `INPUT_URL`
    #[arg(long, env = "INPUT_URL")]
    pub input_url: Option<String>,

    /// Deadline for fetching `--input-url`, in milliseconds.
    ///
    /// Environment variable: `INPUT_TIMEOUT_MS`
    #[arg(long, env = "INPUT_TIMEOUT_MS", default_value_t = 30_000)]
    pub input_timeout_ms: u64,

    /// Layout of the input file.
    ///
    /// Environment variable: `INPUT_FORMAT`
    #[arg(long, env = "INPUT_FORMAT", value_enum, default_value_t = InputFormat::Csv)]
    pub format: InputFormat,

    /// Skip the first line of a CSV input.
    ///
    /// Environment variable: `INPUT_HAS_HEADER`
    #[arg(long, env = "INPUT_HAS_HEADER", default_value_t = false)]
    pub has_header: bool,

    /// Per-shard deadline in milliseconds.
    ///
    /// Environment variable: `TASK_TIMEOUT_MS`
    #[arg(long, env = "TASK_TIMEOUT_MS", default_value_t = 30_000)]
    pub task_timeout_ms: u64,

    /// Maximum simultaneous worker connections. Unset means one per shard.
    ///
    /// Environment variable: `MAX_CONCURRENCY`
    #[arg(long, env = "MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Largest accepted response frame, in bytes.
    ///
    /// Environment variable: `MAX_FRAME_BYTES`
    #[arg(long, env = "MAX_FRAME_BYTES", default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Extra attempts per shard after a worker failure.
    ///
    /// Environment variable: `RETRIES`
    #[arg(long, env = "RETRIES", default_value_t = 0)]
    pub retries: usize,

    /// Base delay between retries in milliseconds, multiplied by the attempt
    /// number.
    ///
    /// Environment variable: `RETRY_BACKOFF_MS`
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value_t = 100)]
    pub retry_backoff_ms: u64,

    /// How partial results are merged.
    ///
    /// Environment variable: `AGGREGATE`
    #[arg(long, env = "AGGREGATE", value_enum, default_value_t = AggregateMode::Concat)]
    pub aggregate: AggregateMode,

    /// Centroid count after `--aggregate recluster`.
    ///
    /// Environment variable: `FINAL_K`
    #[arg(long, env = "FINAL_K", default_value_t = 4)]
    pub final_k: usize,

    /// Seed for the re-clustering pass.
    ///
    /// Environment variable: `CLUSTER_SEED`
    #[arg(long, env = "CLUSTER_SEED")]
    pub seed: Option<u64>,
}

/// Where the coordinator reads its records from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLocation {
    Path(PathBuf),
    Url(String),
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub dispatch: DispatchConfig,
    pub num_shards: usize,
    pub input: InputLocation,
    pub input_timeout: Duration,
    pub format: InputFormat,
    pub has_header: bool,
    pub retries: usize,
    pub retry_backoff: Duration,
    pub aggregate: AggregateMode,
    pub final_k: usize,
    pub seed: Option<u64>,
}

impl CoordinatorConfig {
    /// Builds the aggregator selected by `aggregate`.
    pub fn aggregator(&self) -> Aggregator {
        match self.aggregate {
            AggregateMode::Concat => Aggregator::Concatenate,
            AggregateMode::Recluster => Aggregator::Recluster {
                k: self.final_k,
                computer: Arc::new(KMeansRefiner::new(self.seed)),
            },
        }
    }
}

impl TryFrom<CoordinatorArgs> for CoordinatorConfig {
    type Error = anyhow::Error;

    fn try_from(args: CoordinatorArgs) -> Result<Self, Self::Error> {
        let workers: Vec<String> = args
            .workers
            .into_iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();

        if workers.is_empty() {
            bail!("WORKER_ADDRS must name at least one worker");
        }

        let num_shards = args.shards.unwrap_or(workers.len());
        if num_shards == 0 {
            bail!("NUM_SHARDS must be greater than 0");
        }

        if args.task_timeout_ms == 0 {
            bail!("TASK_TIMEOUT_MS must be greater than 0");
        }

        if args.max_concurrency == Some(0) {
            bail!("MAX_CONCURRENCY must be greater than 0 when set");
        }

        if args.max_frame_bytes == 0 {
            bail!("MAX_FRAME_BYTES must be greater than 0");
        }

        if args.aggregate == AggregateMode::Recluster && args.final_k == 0 {
            bail!("FINAL_K must be greater than 0");
        }

        let input = match (args.input, args.input_url) {
            (Some(path), None) => InputLocation::Path(path),
            (None, Some(url)) => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    bail!("INPUT_URL must be an http:// or https:// URL");
                }
                if args.format != InputFormat::Csv {
                    bail!("INPUT_URL only serves CSV records");
                }
                InputLocation::Url(url)
            }
            (Some(_), Some(_)) => bail!("INPUT_PATH and INPUT_URL are mutually exclusive"),
            (None, None) => bail!("one of INPUT_PATH or INPUT_URL is required"),
        };

        if args.input_timeout_ms == 0 {
            bail!("INPUT_TIMEOUT_MS must be greater than 0");
        }

        let dispatch = DispatchConfig::new(workers)
            .with_task_timeout(Duration::from_millis(args.task_timeout_ms))
            .with_max_concurrency(args.max_concurrency)
            .with_max_frame_bytes(args.max_frame_bytes);

        Ok(Self {
            dispatch,
            num_shards,
            input,
            input_timeout: Duration::from_millis(args.input_timeout_ms),
            format: args.format,
            has_header: args.has_header,
            retries: args.retries,
            retry_backoff: Duration::from_millis(args.retry_backoff_ms),
            aggregate: args.aggregate,
            final_k: args.final_k,
            seed: args.seed,
        })
    }
}
