pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod utils;

pub use api::*;
pub use config::Config;
pub use error::*;
pub use models::*;
pub use pipeline::{Pipeline, PipelineSettings, RunSummary};
pub use utils::*;

use anyhow::{Context, Result};

/// Which scheduled job to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    TeeTimes,
    /// Tee times through the work queue with this many workers
    QueuedTeeTimes(usize),
    Forecasts,
}

/// Load configuration from the environment, run one job and return its summary.
pub async fn run_job(job: Job) -> Result<RunSummary> {
    let config = Config::from_env().context("Failed to load configuration")?;
    run_job_with(&config, job).await
}

pub async fn run_job_with(config: &Config, job: Job) -> Result<RunSummary> {
    let pipeline = Pipeline::from_config(config)?;
    match job {
        Job::TeeTimes => pipeline.run_tee_times().await,
        Job::QueuedTeeTimes(workers) => pipeline.run_tee_times_queued(workers).await,
        Job::Forecasts => pipeline.run_forecasts().await,
    }
}
