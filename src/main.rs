//! cirno - adaptive process pool

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::{OwoColorize, Stream::Stderr};
use std::io::{IsTerminal, Read};
use std::path::Path;
use std::time::Duration;

use cirno::cli::{Cli, Commands, RunArgs, StatusArgs};
use cirno::logging::{self, LogConfig};
use cirno::output::{self, OutputFormat, TaskRecord};
use cirno::task::{self, Task};
use cirno::{HealthPolicy, Pool, ResourceMonitor, SysinfoMonitor};

/// How often `run` refreshes its progress bar.
const PROGRESS_TICK: Duration = Duration::from_millis(100);

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }
    init_logging(&cli);

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::Status(args) => cmd_status(args),
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
        Commands::InternalWorker => cirno::run_worker_main(&cirno::builtin_registry()),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        // Print the error chain if there are causes
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let mut config = match cli.command {
        Commands::InternalWorker => LogConfig::for_worker(),
        _ => LogConfig::for_cli(cli.verbose, cli.quiet),
    }
    .with_env_overrides()
    .with_ansi(!cli.no_color && std::io::stderr().is_terminal());

    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    logging::init(config);
}

fn read_tasks(path: &Path) -> Result<Vec<Task>> {
    if path == Path::new("-") {
        let mut contents = String::new();
        std::io::stdin()
            .read_to_string(&mut contents)
            .context("Failed to read task list from stdin")?;
        return Ok(task::parse_tasks(&contents)?);
    }
    task::load_tasks(path)
        .with_context(|| format!("Failed to load task list {}", path.display()))
}

fn progress_bar(cli: &Cli, args: &RunArgs, len: usize) -> ProgressBar {
    if cli.quiet || args.no_progress || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("  [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("█▓▒░  "));
    }
    pb
}

fn cmd_run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let tasks = read_tasks(&args.tasks)?;
    let mut config = args.pool.to_config();
    if let Some(dir) = &args.output_dir {
        config = config.with_output_dir(dir);
    }
    let pool = Pool::new(config).context("Failed to start pool")?;

    let handles = tasks
        .iter()
        .map(|task| pool.submit(task.clone()))
        .collect::<cirno::Result<Vec<_>>>()?;
    pool.shutdown();
    tracing::info!(tasks = handles.len(), "Submitted task list");

    let pb = progress_bar(cli, args, handles.len());
    loop {
        let done = handles.iter().filter(|h| h.is_done()).count();
        let stats = pool.stats();
        pb.set_position(done as u64);
        pb.set_message(format!("{} running, {} queued", stats.active, stats.pending));
        if done == handles.len() && stats.pending + stats.active == 0 {
            break;
        }
        std::thread::sleep(PROGRESS_TICK);
    }
    pb.finish_and_clear();

    pool.close()?;
    let stats = pool.stats();

    let records: Vec<TaskRecord> = tasks
        .into_iter()
        .zip(&handles)
        .enumerate()
        .map(|(idx, (task, handle))| TaskRecord {
            index: idx + 1,
            task,
            attempts: handle.attempt(),
            output: handle.output_path(),
            outcome: handle.outcome(),
        })
        .collect();

    output::print_records(&records, OutputFormat::from(args.format))?;

    if let Some(path) = &args.report {
        output::report::save_report(path, &records)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
    }

    let failed = records.iter().filter(|r| r.is_failure()).count();
    if !cli.quiet {
        eprintln!(
            "{} tasks: {} ok, {} failed ({} evictions, {} timeouts)",
            records.len(),
            (records.len() - failed).if_supports_color(Stderr, |t| t.green()),
            failed.if_supports_color(Stderr, |t| t.red()),
            stats.evictions,
            stats.timeouts
        );
    }

    if failed > 0 && !args.allow_failures {
        bail!("{} of {} tasks failed", failed, records.len());
    }
    Ok(())
}

fn cmd_status(args: &StatusArgs) -> Result<()> {
    let config = args.pool.to_config();
    config.validate()?;

    let usage = SysinfoMonitor::new().system_usage();
    let policy = HealthPolicy::from_config(&config);
    let status = policy.classify(0, usage);

    match OutputFormat::from(args.format) {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "cpu": usage.cpu,
                "mem": usage.mem,
                "load": usage.load,
                "max_workers": policy.max_workers,
                "min_workers": policy.min_workers,
                "max_load": policy.max_load,
                "smart": policy.smart,
                "low": { "cpu": policy.low.cpu, "mem": policy.low.mem },
                "high": { "cpu": policy.high.cpu, "mem": policy.high.mem },
                "status": status,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Plain => {
            println!("cpu\t{:.1}%", usage.cpu);
            println!("mem\t{:.1}%", usage.mem);
            println!("load\t{:.2}", usage.load);
            println!("max_workers\t{}", policy.max_workers);
            println!("smart\t{}", policy.smart);
            println!("status\t{}", status);
        }
    }
    Ok(())
}
