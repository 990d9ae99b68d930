//! Command-line interface definitions using clap.

use crate::logging::LogFormat;
use crate::output::OutputFormat;
use crate::pool::{DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD, PoolConfig, default_max_workers};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Run tasks in worker processes, as many at a time as the host can take.
#[derive(Parser, Debug)]
#[command(name = "cirno")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Log output format (pretty, compact, json).
    #[arg(long, env = "CIRNO_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every task in a task list and report the outcomes.
    Run(RunArgs),

    /// Show how an idle pool would classify the host right now.
    Status(StatusArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),

    /// Run one task body (used by the pool itself).
    #[command(hide = true)]
    InternalWorker,
}

/// Pool options shared by `run` and `status`.
#[derive(Parser, Debug, Clone)]
pub struct PoolArgs {
    /// Maximum number of concurrent workers [default: number of CPU cores].
    #[arg(short = 'j', long, env = "CIRNO_WORKERS")]
    pub workers: Option<usize>,

    /// Keep at least this many workers running regardless of host load.
    #[arg(long, env = "CIRNO_MIN_WORKERS", default_value_t = 0)]
    pub min_workers: usize,

    /// Ignore host load; run up to --workers tasks at once.
    #[arg(long, env = "CIRNO_NO_SMART")]
    pub no_smart: bool,

    /// Admit workers only while CPU% is below this.
    #[arg(long, env = "CIRNO_LOW_CPU", default_value_t = DEFAULT_LOW_THRESHOLD.cpu)]
    pub low_cpu: f64,

    /// Admit workers only while memory% is below this.
    #[arg(long, env = "CIRNO_LOW_MEM", default_value_t = DEFAULT_LOW_THRESHOLD.mem)]
    pub low_mem: f64,

    /// Evict a worker when CPU% reaches this.
    #[arg(long, env = "CIRNO_HIGH_CPU", default_value_t = DEFAULT_HIGH_THRESHOLD.cpu)]
    pub high_cpu: f64,

    /// Evict a worker when memory% reaches this.
    #[arg(long, env = "CIRNO_HIGH_MEM", default_value_t = DEFAULT_HIGH_THRESHOLD.mem)]
    pub high_mem: f64,

    /// Evict a worker when the 5-minute load average per core reaches this.
    #[arg(long, env = "CIRNO_MAX_LOAD")]
    pub max_load: Option<f64>,

    /// Percent of memory to keep free; caps the memory thresholds.
    #[arg(long, env = "CIRNO_RESERVED_MEM", default_value_t = 0.0)]
    pub reserved_mem: f64,

    /// Seconds between control loop passes.
    #[arg(long, env = "CIRNO_POLL_INTERVAL", default_value = "9", value_parser = parse_seconds)]
    pub poll_interval: Duration,

    /// Seconds a task may run before it is sent SIGALRM.
    #[arg(long, env = "CIRNO_TIMEOUT", value_parser = parse_seconds)]
    pub timeout: Option<Duration>,

    /// Seconds between the timeout SIGALRM and the final SIGKILL.
    #[arg(long, env = "CIRNO_TIMEOUT_GRACE", default_value = "5", value_parser = parse_seconds)]
    pub timeout_grace: Duration,
}

impl PoolArgs {
    /// Build the pool configuration. Validation is left to the pool.
    pub fn to_config(&self) -> PoolConfig {
        let mut config = PoolConfig::default()
            .with_max_workers(self.workers.unwrap_or_else(default_max_workers))
            .with_min_workers(self.min_workers)
            .with_smart(!self.no_smart)
            .with_low_threshold(self.low_cpu, self.low_mem)
            .with_high_threshold(self.high_cpu, self.high_mem)
            .with_reserved_mem(self.reserved_mem)
            .with_poll_interval(self.poll_interval)
            .with_timeout_grace(self.timeout_grace);
        if let Some(load) = self.max_load {
            config = config.with_max_load(load);
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        config
    }
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", s))?;
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| format!("expected a positive number of seconds, got {}", s))
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task list: one JSON task or shell command per line ("-" for stdin).
    pub tasks: PathBuf,

    #[command(flatten)]
    pub pool: PoolArgs,

    /// Output format for task outcomes.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Plain)]
    pub format: OutputFormatArg,

    /// Also write a CSV report (index,work,status,detail) to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Write each task's output to <DIR>/task-<N>.log, N counting from 0.
    #[arg(long, env = "CIRNO_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Exit successfully even if some tasks failed.
    #[arg(long)]
    pub allow_failures: bool,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the status command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub pool: PoolArgs,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Plain)]
    pub format: OutputFormatArg,
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "cirno",
            &mut std::io::stdout(),
        );
    }
}

/// Output format argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormatArg {
    /// One line per task.
    #[default]
    Plain,
    /// JSON document.
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Plain => OutputFormat::Plain,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}
