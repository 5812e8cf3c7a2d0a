use super::{StorageRow, UpsertStore, VenueFilter, VenueSource};
use crate::error::StoreError;
use crate::models::{City, VenueRow};
use serde_json::Value;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

type Table = BTreeMap<String, Value>;

/// In-process store for tests and dry runs.
///
/// Like Postgres, it refuses a batch that touches the same natural key twice.
#[derive(Default)]
pub struct MemoryStore {
    venues: Vec<Value>,
    cities: Vec<City>,
    tables: Mutex<HashMap<&'static str, Table>>,
    upsert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_venues(self, venues: Vec<VenueRow>) -> Self {
        self.with_raw_venues(
            venues
                .iter()
                .filter_map(|row| serde_json::to_value(row).ok())
                .collect(),
        )
    }

    /// Venue rows exactly as the data store would return them, malformed ones included
    pub fn with_raw_venues(mut self, venues: Vec<Value>) -> Self {
        self.venues = venues;
        self
    }

    pub fn with_cities(mut self, cities: Vec<City>) -> Self {
        self.cities = cities;
        self
    }

    /// Stored rows of a table, ordered by natural key
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().get(table).map_or(0, BTreeMap::len)
    }

    /// Number of batches the writer attempted, including rejected ones
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<&'static str, Table>> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl VenueSource for MemoryStore {
    async fn fetch_venue_rows(&self, filter: &VenueFilter) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .venues
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn fetch_cities(&self) -> Result<Vec<City>, StoreError> {
        Ok(self.cities.clone())
    }
}

#[async_trait]
impl UpsertStore for MemoryStore {
    async fn upsert<R: StorageRow>(&self, rows: &[R]) -> Result<(), StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let mut seen = HashSet::new();
        let mut staged = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.natural_key();
            if !seen.insert(key.clone()) {
                return Err(StoreError::Conflict { key });
            }
            staged.push((key, serde_json::to_value(row)?));
        }

        let mut tables = self.lock();
        let table = tables.entry(R::TABLE).or_default();
        for (key, value) in staged {
            table.insert(key, value);
        }
        Ok(())
    }
}
