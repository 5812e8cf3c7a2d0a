use crate::api::transport::{RetryPolicy, RetryingClient};
use crate::error::FetchError;
use crate::models::{City, Forecast, HourlySeries};
use chrono::{Duration, NaiveDate};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
const HOURS_PER_DAY: usize = 24;

pub const FORECAST_DAYS: usize = 14;

pub const HOURLY_METRICS: [&str; 8] = [
    "temperature_2m",
    "wind_speed_10m",
    "wind_gusts_10m",
    "weather_code",
    "precipitation_probability",
    "cloud_cover",
    "uv_index",
    "precipitation",
];

/// Open-Meteo forecast response, restricted to the fields we slice
#[derive(Debug, Deserialize)]
pub struct OpenMeteoResponse {
    #[serde(default)]
    pub hourly_units: HashMap<String, String>,
    pub hourly: HourlyData,
}

#[derive(Debug, Deserialize)]
pub struct HourlyData {
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_gusts_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub weather_code: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_probability: Vec<Option<f64>>,
    #[serde(default)]
    pub cloud_cover: Vec<Option<f64>>,
    #[serde(default)]
    pub uv_index: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation: Vec<Option<f64>>,
}

pub struct OpenMeteoClient {
    transport: Arc<RetryingClient>,
    base_url: String,
    timezone: String,
    policy: RetryPolicy,
}

impl OpenMeteoClient {
    /// `timezone` is the IANA name the hourly series are aligned to.
    pub fn new(transport: Arc<RetryingClient>, timezone: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: OPEN_METEO_URL.to_string(),
            timezone: timezone.into(),
            policy: RetryPolicy::jittered(5, 20_000, 2_000),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch the 14-day hourly forecast for a city and cut it into daily records.
    #[instrument(skip_all, fields(city = %city.name))]
    pub async fn fetch_forecast(
        &self,
        city: &City,
        start_date: NaiveDate,
    ) -> Result<Vec<Forecast>, FetchError> {
        let end_date = start_date + Duration::days(FORECAST_DAYS as i64);
        let query = vec![
            ("latitude".to_string(), city.latitude.to_string()),
            ("longitude".to_string(), city.longitude.to_string()),
            ("hourly".to_string(), HOURLY_METRICS.join(",")),
            ("timezone".to_string(), self.timezone.clone()),
            ("start_date".to_string(), start_date.format("%Y-%m-%d").to_string()),
            ("end_date".to_string(), end_date.format("%Y-%m-%d").to_string()),
        ];

        let response = self
            .transport
            .get(&city.name, &self.base_url, &query, &HeaderMap::new(), &self.policy)
            .await?;
        let parsed: OpenMeteoResponse = response.json(&city.name)?;
        slice_forecast(city.id, &parsed, FORECAST_DAYS)
            .map_err(|message| FetchError::parse(&city.name, message))
    }
}

/// Cut hourly arrays into one [`Forecast`] per day.
///
/// Day `i` takes elements `[i*24, (i+1)*24)` of every metric and is dated by the
/// `time` entry at `i*24`. Only complete days are emitted.
pub fn slice_forecast(
    city_id: i64,
    response: &OpenMeteoResponse,
    days: usize,
) -> Result<Vec<Forecast>, String> {
    let hourly = &response.hourly;
    let available_days = hourly.time.len() / HOURS_PER_DAY;
    if available_days < days {
        warn!(
            "Forecast for city {} covers {} full days, expected {}",
            city_id, available_days, days
        );
    }

    let series = |metric: &str, values: &[Option<f64>], day: usize| HourlySeries {
        unit: response.hourly_units.get(metric).cloned().unwrap_or_default(),
        data: values
            .get(day * HOURS_PER_DAY..(day + 1) * HOURS_PER_DAY)
            .map(<[Option<f64>]>::to_vec)
            .unwrap_or_default(),
    };

    (0..days.min(available_days))
        .map(|day| -> Result<Forecast, String> {
            let stamp = &hourly.time[day * HOURS_PER_DAY];
            let date_part = stamp.split('T').next().unwrap_or(stamp);
            let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                .map_err(|e| format!("bad time entry '{stamp}': {e}"))?;

            Ok(Forecast {
                city_id,
                date,
                temperature_2m: series("temperature_2m", &hourly.temperature_2m, day),
                wind_speed_10m: series("wind_speed_10m", &hourly.wind_speed_10m, day),
                wind_gusts_10m: series("wind_gusts_10m", &hourly.wind_gusts_10m, day),
                weather_code: series("weather_code", &hourly.weather_code, day),
                precipitation_probability: series(
                    "precipitation_probability",
                    &hourly.precipitation_probability,
                    day,
                ),
                cloud_cover: series("cloud_cover", &hourly.cloud_cover, day),
                uv_index: series("uv_index", &hourly.uv_index, day),
                precipitation: series("precipitation", &hourly.precipitation, day),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hourly_json(days: usize) -> serde_json::Value {
        let hours = days * 24;
        let start = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let time: Vec<String> = (0..hours)
            .map(|h| {
                let date = start + Duration::days((h / 24) as i64);
                format!("{}T{:02}:00", date.format("%Y-%m-%d"), h % 24)
            })
            .collect();
        let values: Vec<f64> = (0..hours).map(|h| h as f64).collect();

        let mut hourly = serde_json::Map::new();
        hourly.insert("time".to_string(), json!(time));
        for metric in HOURLY_METRICS {
            hourly.insert(metric.to_string(), json!(values));
        }
        json!({
            "hourly_units": { "temperature_2m": "°C", "precipitation_probability": "%" },
            "hourly": hourly,
        })
    }

    #[test]
    fn test_day_one_is_second_block_of_24() {
        let response: OpenMeteoResponse = serde_json::from_value(hourly_json(14)).unwrap();
        assert_eq!(response.hourly.temperature_2m.len(), 336);

        let days = slice_forecast(9, &response, FORECAST_DAYS).unwrap();
        assert_eq!(days.len(), 14);

        let day_one = &days[1];
        assert_eq!(day_one.date, NaiveDate::from_ymd_opt(2025, 7, 2).unwrap());
        let expected: Vec<Option<f64>> = (24..48).map(|h| Some(h as f64)).collect();
        assert_eq!(day_one.temperature_2m.data, expected);
        assert_eq!(day_one.temperature_2m.unit, "°C");
        assert_eq!(day_one.precipitation_probability.unit, "%");
        assert_eq!(day_one.city_id, 9);
    }

    #[test]
    fn test_short_response_emits_only_full_days() {
        let mut value = hourly_json(3);
        value["hourly"]["time"].as_array_mut().unwrap().truncate(60);
        let response: OpenMeteoResponse = serde_json::from_value(value).unwrap();
        let days = slice_forecast(1, &response, FORECAST_DAYS).unwrap();
        assert_eq!(days.len(), 2);
    }

    #[test]
    fn test_null_samples_survive() {
        let mut value = hourly_json(1);
        value["hourly"]["uv_index"][3] = serde_json::Value::Null;
        let response: OpenMeteoResponse = serde_json::from_value(value).unwrap();
        let days = slice_forecast(1, &response, 1).unwrap();
        assert_eq!(days[0].uv_index.data[3], None);
        assert_eq!(days[0].uv_index.data.len(), 24);
    }

    #[tokio::test]
    async fn test_fetch_forecast_requests_fourteen_days() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("start_date", "2025-07-01"))
            .and(query_param("end_date", "2025-07-15"))
            .and(query_param("timezone", "America/Vancouver"))
            .and(query_param("hourly", HOURLY_METRICS.join(",").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(hourly_json(14)))
            .expect(1)
            .mount(&server)
            .await;

        let transport =
            Arc::new(RetryingClient::direct(std::time::Duration::from_secs(5)).unwrap());
        let client = OpenMeteoClient::new(transport, "America/Vancouver")
            .with_base_url(server.uri())
            .with_retry_policy(RetryPolicy::immediate(1));
        let city = City {
            id: 4,
            name: "Vancouver".to_string(),
            latitude: 49.28,
            longitude: -123.12,
        };

        let forecasts = client
            .fetch_forecast(&city, NaiveDate::from_ymd_opt(2025, 7, 1).unwrap())
            .await
            .unwrap();
        assert_eq!(forecasts.len(), 14);
        assert!(forecasts.iter().all(|f| f.city_id == 4));
    }
}
