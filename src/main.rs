use clap::Parser;
use rowflow::{builtin_names, factory_for, Format, JobConfig, Pipeline, RunOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Process a record file in parallel batches through a named transform.
#[derive(Parser, Debug)]
#[command(name = "rowflow", version, about)]
struct Cli {
    /// Input file to process.
    #[arg(short, long)]
    input: PathBuf,

    /// Destination file(s); repeat for multiple destinations.
    #[arg(short, long, required = true)]
    output: Vec<PathBuf>,

    /// Where to write the final statistics document.
    #[arg(long, default_value = "stats.json")]
    stats: PathBuf,

    /// Built-in transform to run on every record.
    #[arg(short, long, default_value = "passthrough")]
    transform: String,

    /// Input and output encoding: jsonl, csv, or parquet.
    #[arg(short, long, default_value = "jsonl")]
    format: String,

    /// Parallel worker units; 0 means one per CPU core.
    #[arg(short, long, default_value_t = JobConfig::DEFAULT_WORKERS)]
    workers: usize,

    /// Records per dispatched batch.
    #[arg(short, long, default_value_t = JobConfig::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Write results strictly in input order.
    #[arg(long)]
    keep_order: bool,

    /// Seconds between progress log lines.
    #[arg(long, default_value_t = 10)]
    report_interval_secs: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let format: Format = match cli.format.parse() {
        Ok(format) => format,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(2);
        }
    };

    let Some(factory) = factory_for(&cli.transform) else {
        error!(
            "unknown transform '{}'; available: {}",
            cli.transform,
            builtin_names().join(", ")
        );
        return ExitCode::from(2);
    };

    let mut config = JobConfig::new(cli.input, cli.output, cli.stats, format);
    config.workers = if cli.workers == 0 {
        num_cpus::get()
    } else {
        cli.workers
    };
    config.batch_size = cli.batch_size;
    config.keep_order = cli.keep_order;
    config.report_interval = Duration::from_secs(cli.report_interval_secs.max(1));

    let mut pipeline = Pipeline::new(config, factory);

    let shutdown = pipeline.shutdown_flag();
    if let Err(err) = ctrlc::set_handler(move || {
        info!("interrupt received, finishing in-flight batches");
        shutdown.store(true, Ordering::SeqCst);
    }) {
        error!("install signal handler: {err}");
        return ExitCode::FAILURE;
    }

    match pipeline.run() {
        Ok(summary) if summary.outcome == RunOutcome::Interrupted => ExitCode::from(130),
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
