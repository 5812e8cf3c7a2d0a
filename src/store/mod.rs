//! Data store boundary: venue/city reads and upsert-on-conflict writes.

mod memory;
mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

use crate::error::StoreError;
use crate::models::{City, ForecastRow, TeeTimeRow, Venue, VenueRow};
use async_trait::async_trait;
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// A row written with upsert-on-conflict: conflicting rows are fully replaced.
pub trait StorageRow: Serialize + Send + Sync {
    const TABLE: &'static str;
    const CONFLICT_COLUMNS: &'static [&'static str];

    /// Value of the conflict columns, used to spot duplicates inside one batch
    fn natural_key(&self) -> String;
}

impl StorageRow for TeeTimeRow {
    const TABLE: &'static str = "tee_times";
    const CONFLICT_COLUMNS: &'static [&'static str] = &["course_id", "date"];

    fn natural_key(&self) -> String {
        format!("{}:{}", self.course_id, self.date)
    }
}

impl StorageRow for ForecastRow {
    const TABLE: &'static str = "forecasts";
    const CONFLICT_COLUMNS: &'static [&'static str] = &["city_id", "date"];

    fn natural_key(&self) -> String {
        format!("{}:{}", self.forecast.city_id, self.forecast.date)
    }
}

/// Which venues a run covers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VenueFilter {
    /// Only venues using this integration kind
    pub external_api: Option<String>,
    /// Only venues whose city is in one of these regions. Empty means all.
    pub region_ids: Vec<i64>,
}

impl VenueFilter {
    /// Match a raw row the way the PostgREST query filters it.
    pub fn matches(&self, row: &Value) -> bool {
        let api_ok = self
            .external_api
            .as_deref()
            .map_or(true, |api| row["external_api"].as_str() == Some(api));
        let region_ok = self.region_ids.is_empty()
            || row["cities"]["region_id"]
                .as_i64()
                .is_some_and(|id| self.region_ids.contains(&id));
        api_ok && region_ok
    }
}

#[async_trait]
pub trait VenueSource: Send + Sync {
    /// Venue rows as stored, untyped. One malformed row must not hide the others.
    async fn fetch_venue_rows(&self, filter: &VenueFilter) -> Result<Vec<Value>, StoreError>;
    async fn fetch_cities(&self) -> Result<Vec<City>, StoreError>;
}

#[async_trait]
pub trait UpsertStore: Send + Sync {
    /// Write one batch. The whole batch succeeds or fails together.
    async fn upsert<R: StorageRow>(&self, rows: &[R]) -> Result<(), StoreError>;
}

/// Load venues and turn each stored row into a typed [`Venue`].
///
/// Rows with a missing or unknown integration kind, malformed columns or malformed
/// attributes are skipped with a warning; they never fail the run.
pub async fn load_venues<S>(
    source: &S,
    filter: &VenueFilter,
    default_timezone: Tz,
) -> Result<Vec<Venue>, StoreError>
where
    S: VenueSource + ?Sized,
{
    let rows = source.fetch_venue_rows(filter).await?;
    let total = rows.len();

    let venues: Vec<Venue> = rows
        .into_iter()
        .map(|raw| VenueRow::from_value(raw).and_then(|row| row.into_venue(default_timezone)))
        .filter_map(|typed| match typed {
            Ok(venue) => Some(venue),
            Err(e) => {
                warn!("Skipping venue: {}", e);
                None
            }
        })
        .collect();

    info!("Loaded {} of {} venues", venues.len(), total);
    Ok(venues)
}
