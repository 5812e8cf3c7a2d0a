use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tee_time_aggregator::{logging, run_job_with, Config, Job, RunSummary};

#[derive(Parser)]
#[command(name = "cli", about = "Refresh stored golf tee times and weather forecasts")]
struct Cli {
    /// Debug-level logging for this crate
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch tee times for every tracked venue and upsert them
    TeeTimes {
        /// Only venues in these regions (overrides REGION_IDS)
        #[arg(long, value_delimiter = ',')]
        region: Vec<i64>,

        /// Only venues using this integration, e.g. CPS (overrides EXTERNAL_API)
        #[arg(long)]
        external_api: Option<String>,

        /// Dispatch work items to a worker queue instead of one batched write
        #[arg(long)]
        queue: bool,

        /// Worker count in queue mode
        #[arg(long, default_value_t = 8)]
        workers: usize,
    },
    /// Fetch the 14-day forecast for every city and upsert it
    Forecasts,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = Config::from_env().context("Failed to load configuration")?;

    let job = match cli.command {
        Command::TeeTimes {
            region,
            external_api,
            queue,
            workers,
        } => {
            if !region.is_empty() {
                config.region_ids = region;
            }
            if external_api.is_some() {
                config.external_api = external_api;
            }
            if queue {
                Job::QueuedTeeTimes(workers)
            } else {
                Job::TeeTimes
            }
        }
        Command::Forecasts => Job::Forecasts,
    };

    let summary = run_job_with(&config, job).await?;
    print_summary(&summary);

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", summary.message());
    println!("  - {} groups written", summary.upsert.total_processed);
    println!("  - {} batches", summary.upsert.total_batches);
    if summary.tee_times > 0 {
        println!("  - {} tee times", summary.tee_times);
    }
    if summary.forecasts > 0 {
        println!("  - {} forecast days", summary.forecasts);
    }
    for failure in &summary.upsert.errors {
        println!("  ! batch {}: {}", failure.batch, failure.error);
    }
    println!("  - finished in {}ms (status {})", summary.execution_time_ms, summary.status_code());
}
