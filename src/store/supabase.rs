use super::{StorageRow, UpsertStore, VenueFilter, VenueSource};
use crate::error::StoreError;
use crate::models::City;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::debug;

const VENUE_SELECT: &str = "*,cities!inner(name,region_id)";
const CITY_SELECT: &str = "id,name,latitude,longitude";

/// PostgREST client for the Supabase project holding venues, tee times and forecasts
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    service_key: String,
}

impl SupabaseStore {
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl VenueSource for SupabaseStore {
    async fn fetch_venue_rows(
        &self,
        filter: &VenueFilter,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let mut query = vec![("select".to_string(), VENUE_SELECT.to_string())];
        if let Some(api) = &filter.external_api {
            query.push(("external_api".to_string(), format!("eq.{api}")));
        }
        if !filter.region_ids.is_empty() {
            let ids = filter
                .region_ids
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            query.push(("cities.region_id".to_string(), format!("in.({ids})")));
        }

        let response = self
            .authed(self.client.get(self.table_url("courses")).query(&query))
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = Self::check(response).await?.json().await?;
        debug!("Fetched {} venue rows", rows.len());
        Ok(rows)
    }

    async fn fetch_cities(&self) -> Result<Vec<City>, StoreError> {
        let response = self
            .authed(
                self.client
                    .get(self.table_url("cities"))
                    .query(&[("select", CITY_SELECT)]),
            )
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl UpsertStore for SupabaseStore {
    async fn upsert<R: StorageRow>(&self, rows: &[R]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_vec(rows)?;
        let response = self
            .authed(
                self.client
                    .post(self.table_url(R::TABLE))
                    .query(&[("on_conflict", R::CONFLICT_COLUMNS.join(","))])
                    .header("Prefer", "resolution=merge-duplicates,return=minimal")
                    .header("Content-Type", "application/json")
                    .body(body),
            )
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
