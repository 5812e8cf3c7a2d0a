//! Run drivers for the two scheduled jobs: tee times and forecasts.

pub mod dispatch;
pub mod orchestrator;

use crate::api::weather_api::OpenMeteoClient;
use crate::api::{ChronoClient, CpsClient, ProxyRotation, RetryingClient, TeeTimeSource, UpstreamClients};
use crate::config::Config;
use crate::error::FailurePolicy;
use crate::models::{ForecastRow, TeeTimeRow};
use crate::store::{load_venues, SupabaseStore, UpsertStore, VenueFilter, VenueSource};
use crate::utils::batch::{batch_upsert, UpsertSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info};

pub use dispatch::WorkerReport;
pub use orchestrator::{fetch_all, plan_work, Progress, WorkItem};

/// Everything a run needs besides its collaborators
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub max_concurrency: Option<usize>,
    pub default_timezone: Tz,
    pub cron_check_url: Option<String>,
    pub filter: VenueFilter,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            max_concurrency: config.max_concurrency,
            default_timezone: config.default_timezone,
            cron_check_url: config.cron_check_url.clone(),
            filter: VenueFilter {
                external_api: config.external_api.clone(),
                region_ids: config.region_ids.clone(),
            },
        }
    }
}

/// Result of one run, shaped like the scheduler-facing response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub pipeline: &'static str,
    pub execution_time_ms: u64,
    pub venues: usize,
    pub cities: usize,
    pub groups: usize,
    pub tee_times: usize,
    pub forecasts: usize,
    pub upsert: UpsertSummary,
}

impl RunSummary {
    fn new(pipeline: &'static str) -> Self {
        Self {
            pipeline,
            execution_time_ms: 0,
            venues: 0,
            cities: 0,
            groups: 0,
            tee_times: 0,
            forecasts: 0,
            upsert: UpsertSummary::default(),
        }
    }

    /// Only persistence errors fail a run; empty upstream results do not.
    pub fn is_success(&self) -> bool {
        self.upsert.is_success()
    }

    pub fn status_code(&self) -> u16 {
        if self.is_success() {
            200
        } else {
            500
        }
    }

    pub fn message(&self) -> String {
        if self.is_success() {
            format!(
                "{} run completed: {} records stored",
                self.pipeline, self.upsert.total_processed
            )
        } else {
            format!(
                "{} run completed with {} failed batches",
                self.pipeline,
                self.upsert.errors.len()
            )
        }
    }

    pub fn log(&self) {
        info!("=== {} run summary ===", self.pipeline);
        info!("Execution time: {}ms", self.execution_time_ms);
        if self.venues > 0 {
            info!("Venues: {}", self.venues);
        }
        if self.cities > 0 {
            info!("Cities: {}", self.cities);
        }
        info!("Groups: {}", self.groups);
        if self.tee_times > 0 {
            info!("Tee times: {}", self.tee_times);
        }
        if self.forecasts > 0 {
            info!("Forecast days: {}", self.forecasts);
        }
        info!(
            "Records: {} in {} batches",
            self.upsert.total_processed, self.upsert.total_batches
        );
        for failure in &self.upsert.errors {
            error!("Batch {} failed: {}", failure.batch, failure.error);
        }
        info!("Status: {}", self.status_code());
    }
}

pub struct Pipeline<St> {
    store: Arc<St>,
    source: Arc<dyn TeeTimeSource>,
    weather: OpenMeteoClient,
    transport: Arc<RetryingClient>,
    settings: PipelineSettings,
}

impl Pipeline<SupabaseStore> {
    /// Wire the production collaborators from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let proxies = ProxyRotation::new(
            &config.proxy_urls,
            config.proxy_probability,
            config.http_timeout,
        )
        .context("Failed to build proxy clients")?;
        if proxies.is_enabled() {
            info!(
                "Proxy rotation enabled: {} proxies, probability {}",
                proxies.len(),
                config.proxy_probability
            );
        }

        let transport = Arc::new(
            RetryingClient::new(config.http_timeout, proxies)
                .context("Failed to build HTTP client")?,
        );
        let weather_transport = Arc::new(
            RetryingClient::direct(config.http_timeout)
                .context("Failed to build weather HTTP client")?,
        );

        let source = UpstreamClients::new(
            CpsClient::new(Arc::clone(&transport), config.cps_credentials.clone()),
            ChronoClient::new(Arc::clone(&transport)),
        );
        let weather = OpenMeteoClient::new(weather_transport, config.default_timezone.name());
        let store = SupabaseStore::new(
            &config.supabase_url,
            &config.supabase_service_key,
            config.http_timeout,
        )
        .context("Failed to build data store client")?;

        Ok(Self::new(
            Arc::new(store),
            Arc::new(source),
            weather,
            transport,
            PipelineSettings::from_config(config),
        ))
    }
}

impl<St> Pipeline<St>
where
    St: VenueSource + UpsertStore + 'static,
{
    pub fn new(
        store: Arc<St>,
        source: Arc<dyn TeeTimeSource>,
        weather: OpenMeteoClient,
        transport: Arc<RetryingClient>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            source,
            weather,
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn run_tee_times(&self) -> Result<RunSummary> {
        self.run_tee_times_at(Utc::now()).await
    }

    /// Fetch every venue's horizon, then write all groups in batches.
    pub async fn run_tee_times_at(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new("tee-times");

        let venues = load_venues(
            self.store.as_ref(),
            &self.settings.filter,
            self.settings.default_timezone,
        )
        .await
        .context("Failed to load venues")?;
        summary.venues = venues.len();

        let groups = fetch_all(
            self.source.as_ref(),
            &venues,
            now,
            self.settings.max_concurrency,
        )
        .await;
        summary.groups = groups.len();
        summary.tee_times = groups.iter().map(|g| g.tee_times_count()).sum();

        let updated_at = Utc::now();
        let rows: Vec<TeeTimeRow> = groups
            .into_iter()
            .map(|group| TeeTimeRow::from_group(group, updated_at))
            .collect();
        summary.upsert = batch_upsert(self.store.as_ref(), &rows, self.settings.batch_size).await;

        self.finish(summary, started).await
    }

    /// Queue mode: dispatch one item per (venue, date) and let `workers` consumers
    /// fetch and store them independently.
    pub async fn run_tee_times_queued(&self, workers: usize) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new("tee-times");

        let venues = load_venues(
            self.store.as_ref(),
            &self.settings.filter,
            self.settings.default_timezone,
        )
        .await
        .context("Failed to load venues")?;
        summary.venues = venues.len();

        let items = plan_work(&venues, Utc::now());
        let (sender, receiver) = mpsc::channel(workers.max(1) * 4);
        let handle = dispatch::spawn_workers(
            workers,
            receiver,
            Arc::clone(&self.source),
            Arc::clone(&self.store),
        );
        let dispatched = dispatch::dispatch(sender, items);

        let report = handle.await.context("Worker pool failed")?;
        info!(
            "Workers processed {}/{} items",
            report.items_processed, dispatched
        );

        summary.groups = report.items_processed;
        summary.tee_times = report.tee_times;
        summary.upsert = UpsertSummary {
            total_processed: report.items_processed,
            total_batches: report.items_processed,
            errors: report.errors,
        };

        self.finish(summary, started).await
    }

    pub async fn run_forecasts(&self) -> Result<RunSummary> {
        self.run_forecasts_at(Utc::now()).await
    }

    /// Fetch 14 days of weather per city and write one row per (city, date).
    pub async fn run_forecasts_at(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new("forecasts");

        let cities = self
            .store
            .fetch_cities()
            .await
            .context("Failed to load cities")?;
        summary.cities = cities.len();

        let today = now
            .with_timezone(&self.settings.default_timezone)
            .date_naive();
        info!("Fetching forecasts for {} cities from {}", cities.len(), today);

        let fetches = cities.iter().map(|city| async move {
            let result = self.weather.fetch_forecast(city, today).await;
            FailurePolicy::TreatAsEmpty
                .resolve(result, &city.name)
                .unwrap_or_default()
        });
        let forecasts: Vec<_> = join_all(fetches).await.into_iter().flatten().collect();
        summary.forecasts = forecasts.len();
        summary.groups = forecasts.len();

        let updated_at = Utc::now();
        let rows: Vec<ForecastRow> = forecasts
            .into_iter()
            .map(|forecast| ForecastRow {
                forecast,
                updated_at,
            })
            .collect();
        summary.upsert = batch_upsert(self.store.as_ref(), &rows, self.settings.batch_size).await;

        self.finish(summary, started).await
    }

    async fn finish(&self, mut summary: RunSummary, started: Instant) -> Result<RunSummary> {
        summary.execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        summary.log();

        if summary.is_success() {
            if let Some(url) = &self.settings.cron_check_url {
                self.transport.ping(url).await;
            }
        }
        Ok(summary)
    }
}
