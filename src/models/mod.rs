use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod venue_row;

pub use venue_row::{CityRef, VenueRow};

pub const CPS: &str = "CPS";
pub const CHRONO_LIGHTSPEED: &str = "CHRONO_LIGHTSPEED";

/// A tracked golf course with exactly one upstream booking integration
#[derive(Debug, Clone)]
pub struct Venue {
    pub id: i64,
    pub name: String,
    pub city: Option<String>,
    pub timezone: Tz,
    pub booking_visibility_days: u32,
    /// Furthest-out horizon day only becomes visible after this local time
    pub booking_visibility_start_time: Option<NaiveTime>,
    pub integration: VenueIntegration,
}

/// Integration-specific attributes, one variant per upstream API family
#[derive(Debug, Clone, PartialEq)]
pub enum VenueIntegration {
    Cps(CpsAttributes),
    ChronoLightspeed(ChronoAttributes),
}

impl VenueIntegration {
    pub fn kind(&self) -> &'static str {
        match self {
            VenueIntegration::Cps(_) => CPS,
            VenueIntegration::ChronoLightspeed(_) => CHRONO_LIGHTSPEED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CpsAttributes {
    pub subdomain: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(skip)]
    pub requires_login: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChronoAttributes {
    pub club_id: u64,
    pub course_id: u64,
    pub affiliation_type_id: u64,
    pub course_holes: Vec<u32>,
    pub club_link_name: String,
}

/// One bookable slot at one venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeeTime {
    pub tee_time_id: String,
    /// Upstream local time, no timezone conversion applied
    #[serde(with = "minute_precision")]
    pub start_datetime: NaiveDateTime,
    pub players_available: u32,
    pub available_participants: Vec<u32>,
    pub holes: u32,
    pub price: f64,
    pub booking_link: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub booking_links: BTreeMap<u32, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_tee: Option<u32>,
}

/// Fetched tee times for one (venue, date) pair. Unit of work and of persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultGroup {
    pub venue_id: i64,
    pub date: NaiveDate,
    pub tee_times: Vec<TeeTime>,
}

impl ResultGroup {
    pub fn tee_times_count(&self) -> usize {
        self.tee_times.len()
    }
}

/// Storage shape of a [`ResultGroup`] in the `tee_times` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeeTimeRow {
    pub course_id: i64,
    pub date: NaiveDate,
    pub tee_times_data: Vec<TeeTime>,
    pub tee_times_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl TeeTimeRow {
    pub fn from_group(group: ResultGroup, updated_at: DateTime<Utc>) -> Self {
        Self {
            course_id: group.venue_id,
            date: group.date,
            tee_times_count: group.tee_times.len(),
            tee_times_data: group.tee_times,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// 24 hourly samples of one weather metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySeries {
    pub unit: String,
    pub data: Vec<Option<f64>>,
}

/// Weather for one city on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub city_id: i64,
    pub date: NaiveDate,
    pub temperature_2m: HourlySeries,
    pub wind_speed_10m: HourlySeries,
    pub wind_gusts_10m: HourlySeries,
    pub weather_code: HourlySeries,
    pub precipitation_probability: HourlySeries,
    pub cloud_cover: HourlySeries,
    pub uv_index: HourlySeries,
    pub precipitation: HourlySeries,
}

/// Storage shape of a [`Forecast`] in the `forecasts` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRow {
    #[serde(flatten)]
    pub forecast: Forecast,
    pub updated_at: DateTime<Utc>,
}

/// Start times are serialized as `YYYY-MM-DDTHH:MM`, the shape the search frontend reads.
mod minute_precision {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tee_time() -> TeeTime {
        TeeTime {
            tee_time_id: "12025060108:00-18".to_string(),
            start_datetime: NaiveDate::from_ymd_opt(2025, 6, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            players_available: 2,
            available_participants: vec![1, 2],
            holes: 18,
            price: 55.0,
            booking_link: "https://example.com".to_string(),
            booking_links: BTreeMap::new(),
            starting_tee: None,
        }
    }

    #[test]
    fn test_start_datetime_serializes_to_minutes() {
        let json = serde_json::to_value(tee_time()).unwrap();
        assert_eq!(json["start_datetime"], "2025-06-01T08:00");
        assert!(json.get("booking_links").is_none());
        assert!(json.get("starting_tee").is_none());

        let back: TeeTime = serde_json::from_value(json).unwrap();
        assert_eq!(back, tee_time());
    }

    #[test]
    fn test_row_count_matches_payload() {
        let group = ResultGroup {
            venue_id: 7,
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            tee_times: vec![tee_time(), tee_time()],
        };
        let row = TeeTimeRow::from_group(group, Utc::now());
        assert_eq!(row.course_id, 7);
        assert_eq!(row.tee_times_count, 2);

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["date"], "2025-06-01");
        assert_eq!(json["tee_times_data"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_forecast_row_flattens() {
        let series = HourlySeries {
            unit: "°C".to_string(),
            data: vec![Some(12.5); 24],
        };
        let row = ForecastRow {
            forecast: Forecast {
                city_id: 3,
                date: NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(),
                temperature_2m: series.clone(),
                wind_speed_10m: series.clone(),
                wind_gusts_10m: series.clone(),
                weather_code: series.clone(),
                precipitation_probability: series.clone(),
                cloud_cover: series.clone(),
                uv_index: series.clone(),
                precipitation: series,
            },
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["city_id"], 3);
        assert_eq!(json["temperature_2m"]["unit"], "°C");
        assert_eq!(json["uv_index"]["data"].as_array().unwrap().len(), 24);
        assert!(json.get("updated_at").is_some());
    }
}
