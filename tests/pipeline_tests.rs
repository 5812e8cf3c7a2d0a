use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tee_time_aggregator::error::{FetchError, StoreError};
use tee_time_aggregator::models::{City, CityRef, ResultGroup, TeeTime, TeeTimeRow, Venue, VenueRow};
use tee_time_aggregator::store::{MemoryStore, StorageRow, UpsertStore, VenueFilter, VenueSource};
use tee_time_aggregator::utils::batch::batch_upsert;
use tee_time_aggregator::{OpenMeteoClient, Pipeline, PipelineSettings, RetryPolicy, RetryingClient, TeeTimeSource};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Two tee times per (venue, date); venue 13 always fails upstream.
struct FakeSource;

#[async_trait]
impl TeeTimeSource for FakeSource {
    async fn fetch_tee_times(
        &self,
        venue: &Venue,
        date: NaiveDate,
    ) -> Result<Vec<TeeTime>, FetchError> {
        if venue.id == 13 {
            return Err(FetchError::Exhausted {
                label: venue.name.clone(),
                attempts: 5,
                status: Some(503),
                body: "unavailable".to_string(),
                via_proxy: false,
            });
        }
        Ok([7, 9]
            .iter()
            .map(|&hour| TeeTime {
                tee_time_id: format!("{}{}{:02}00-18", venue.id, date.format("%Y%m%d"), hour),
                start_datetime: date.and_hms_opt(hour, 0, 0).unwrap(),
                players_available: 4,
                available_participants: vec![4],
                holes: 18,
                price: 45.0,
                booking_link: "https://example.com/book".to_string(),
                booking_links: BTreeMap::new(),
                starting_tee: None,
            })
            .collect())
    }
}

/// Memory store whose upserts fail for any batch containing `poisoned_course`.
struct FlakyStore {
    inner: MemoryStore,
    poisoned_course: i64,
}

#[async_trait]
impl VenueSource for FlakyStore {
    async fn fetch_venue_rows(
        &self,
        filter: &VenueFilter,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        self.inner.fetch_venue_rows(filter).await
    }

    async fn fetch_cities(&self) -> Result<Vec<City>, StoreError> {
        self.inner.fetch_cities().await
    }
}

#[async_trait]
impl UpsertStore for FlakyStore {
    async fn upsert<R: StorageRow>(&self, rows: &[R]) -> Result<(), StoreError> {
        let poisoned = format!("{}:", self.poisoned_course);
        if rows.iter().any(|r| r.natural_key().starts_with(&poisoned)) {
            return Err(StoreError::Rejected {
                status: 400,
                message: "invalid input syntax".to_string(),
            });
        }
        self.inner.upsert(rows).await
    }
}

fn venue_row(id: i64, days: u32) -> VenueRow {
    VenueRow {
        id,
        name: format!("Course {id}"),
        external_api: Some("CPS".to_string()),
        external_api_attributes: json!({ "subdomain": format!("course{id}") }),
        booking_visibility_days: Some(days),
        booking_visibility_start_time: None,
        timezone: Some("America/Vancouver".to_string()),
        requires_login: None,
        cities: Some(CityRef {
            name: Some("Vancouver".to_string()),
            region_id: Some(1),
        }),
    }
}

fn row(course_id: i64, day: u32) -> TeeTimeRow {
    TeeTimeRow::from_group(
        ResultGroup {
            venue_id: course_id,
            date: NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
            tee_times: Vec::new(),
        },
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
    )
}

fn transport() -> Arc<RetryingClient> {
    Arc::new(RetryingClient::direct(Duration::from_secs(5)).unwrap())
}

fn settings(cron_check_url: Option<String>) -> PipelineSettings {
    PipelineSettings {
        batch_size: 2,
        max_concurrency: None,
        default_timezone: chrono_tz::America::Vancouver,
        cron_check_url,
        filter: VenueFilter::default(),
    }
}

#[tokio::test]
async fn test_rewriting_identical_rows_is_idempotent() {
    let store = MemoryStore::new();
    let rows: Vec<_> = (1..=5).map(|d| row(1, d)).collect();

    let first = batch_upsert(&store, &rows, 2).await;
    let after_first = store.rows("tee_times");
    let second = batch_upsert(&store, &rows, 2).await;

    assert!(first.is_success() && second.is_success());
    assert_eq!(store.row_count("tee_times"), 5);
    assert_eq!(store.rows("tee_times"), after_first);
}

#[tokio::test]
async fn test_failed_batch_does_not_stop_later_batches() {
    let store = MemoryStore::new();
    // Batch 2 touches (2, 2025-06-01) twice and is rejected as a whole.
    let rows = vec![
        row(1, 1),
        row(1, 2),
        row(2, 1),
        row(2, 1),
        row(3, 1),
        row(3, 2),
    ];

    let summary = batch_upsert(&store, &rows, 2).await;

    assert_eq!(summary.total_batches, 3);
    assert_eq!(summary.total_processed, 6);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].batch, 2);
    assert_eq!(store.upsert_calls(), 3);
    assert_eq!(store.row_count("tee_times"), 4);
}

#[tokio::test]
async fn test_tee_time_run_writes_one_row_per_pair_and_pings() {
    let cron = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&cron)
        .await;

    let store = Arc::new(MemoryStore::new().with_venues(vec![venue_row(1, 2), venue_row(13, 1)]));
    let pipeline = Pipeline::new(
        Arc::clone(&store),
        Arc::new(FakeSource),
        OpenMeteoClient::new(transport(), "America/Vancouver"),
        transport(),
        settings(Some(format!("{}/ping", cron.uri()))),
    );

    // 18:00 UTC is 11:00 in Vancouver
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
    let summary = pipeline.run_tee_times_at(now).await.unwrap();

    assert_eq!(summary.venues, 2);
    assert_eq!(summary.groups, 5);
    assert_eq!(summary.tee_times, 6);
    assert_eq!(summary.upsert.total_batches, 3);
    assert_eq!(summary.status_code(), 200);

    let rows = store.rows("tee_times");
    assert_eq!(rows.len(), 5);
    let failing: Vec<_> = rows.iter().filter(|r| r["course_id"] == 13).collect();
    assert_eq!(failing.len(), 2);
    assert!(failing.iter().all(|r| r["tee_times_count"] == 0));
    let healthy = rows.iter().find(|r| r["course_id"] == 1).unwrap();
    assert_eq!(healthy["tee_times_data"][0]["start_datetime"], "2025-06-01T07:00");
}

#[tokio::test]
async fn test_batch_error_fails_run_and_skips_ping() {
    let cron = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&cron)
        .await;

    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new().with_venues(vec![venue_row(1, 1), venue_row(2, 1)]),
        poisoned_course: 2,
    });
    let pipeline = Pipeline::new(
        Arc::clone(&store),
        Arc::new(FakeSource),
        OpenMeteoClient::new(transport(), "America/Vancouver"),
        transport(),
        settings(Some(cron.uri())),
    );

    let now = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
    let summary = pipeline.run_tee_times_at(now).await.unwrap();

    assert_eq!(summary.status_code(), 500);
    assert!(!summary.is_success());
    assert_eq!(summary.upsert.errors.len(), 1);
    assert_eq!(summary.upsert.errors[0].batch, 2);
    assert_eq!(store.inner.row_count("tee_times"), 2);
}

#[tokio::test]
async fn test_queued_run_stores_every_item() {
    let store = Arc::new(MemoryStore::new().with_venues(vec![venue_row(1, 3)]));
    let pipeline = Pipeline::new(
        Arc::clone(&store),
        Arc::new(FakeSource),
        OpenMeteoClient::new(transport(), "America/Vancouver"),
        transport(),
        settings(None),
    );

    let summary = pipeline.run_tee_times_queued(2).await.unwrap();
    assert_eq!(summary.groups, 4);
    assert_eq!(summary.tee_times, 8);
    assert!(summary.is_success());
    assert_eq!(store.row_count("tee_times"), 4);
}

#[tokio::test]
async fn test_forecast_run_writes_fourteen_days_per_city() {
    let weather = MockServer::start().await;
    let start = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
    let time: Vec<String> = (0..14 * 24)
        .map(|h| {
            let date = start + chrono::Duration::days(h / 24);
            format!("{}T{:02}:00", date.format("%Y-%m-%d"), h % 24)
        })
        .collect();
    let values: Vec<f64> = (0..14 * 24).map(|h| f64::from(h % 30)).collect();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hourly_units": { "temperature_2m": "°C" },
            "hourly": {
                "time": time,
                "temperature_2m": values,
                "wind_speed_10m": values,
                "wind_gusts_10m": values,
                "weather_code": values,
                "precipitation_probability": values,
                "cloud_cover": values,
                "uv_index": values,
                "precipitation": values
            }
        })))
        .expect(2)
        .mount(&weather)
        .await;

    let cities = vec![
        City {
            id: 1,
            name: "Vancouver".to_string(),
            latitude: 49.28,
            longitude: -123.12,
        },
        City {
            id: 2,
            name: "Burnaby".to_string(),
            latitude: 49.25,
            longitude: -122.98,
        },
    ];
    let store = Arc::new(MemoryStore::new().with_cities(cities));
    let weather_client = OpenMeteoClient::new(transport(), "America/Vancouver")
        .with_base_url(weather.uri())
        .with_retry_policy(RetryPolicy::immediate(1));
    let mut settings = settings(None);
    settings.batch_size = 100;
    let pipeline = Pipeline::new(
        Arc::clone(&store),
        Arc::new(FakeSource),
        weather_client,
        transport(),
        settings,
    );

    let now = Utc.with_ymd_and_hms(2025, 7, 1, 18, 0, 0).unwrap();
    let summary = pipeline.run_forecasts_at(now).await.unwrap();

    assert_eq!(summary.cities, 2);
    assert_eq!(summary.forecasts, 28);
    assert_eq!(summary.upsert.total_batches, 1);
    assert!(summary.is_success());
    assert_eq!(store.row_count("forecasts"), 28);

    let rows = store.rows("forecasts");
    assert_eq!(rows[0]["temperature_2m"]["unit"], "°C");
    assert_eq!(rows[0]["temperature_2m"]["data"].as_array().unwrap().len(), 24);
}
