use crate::api::transport::{decode_each, header_map, RetryPolicy, RetryingClient};
use crate::config::CpsCredentials;
use crate::error::{FailurePolicy, FetchError};
use crate::models::{CpsAttributes, TeeTime};
use crate::utils::normalize::{sort_by_start, tee_time_id};
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, REFERER};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const TEE_TIMES_PATH: &str = "/onlineres/onlineapi/api/v1/onlinereservation/TeeTimes";
const TOKEN_PATH: &str = "/identityapi/connect/token";
const SEARCH_DATE_KEY: &str = "searchDate";
const NO_TEETIMES: &str = "NO_TEETIMES";
const CLIENT_ID: &str = "js1";
const CLIENT_SECRET: &str = "v4secret";

/// Either a list of slots or a `{ messageKey }` object. Slots stay raw so one
/// malformed slot is skipped on its own.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CpsTeeTimesResponse {
    Slots(Vec<serde_json::Value>),
    Message {
        #[serde(rename = "messageKey")]
        message_key: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CpsTeeTime {
    start_time: String,
    #[serde(default)]
    available_participant_no: Vec<u32>,
    #[serde(default)]
    holes: Option<u32>,
    /// e.g. "18" or "9 or 18"
    #[serde(default)]
    holes_display: Option<String>,
    #[serde(default)]
    sh_item_prices: Vec<CpsItemPrice>,
    #[serde(default)]
    starting_tee: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CpsItemPrice {
    #[serde(default)]
    sh_item_code: Option<String>,
    #[serde(default)]
    current_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl CpsTeeTime {
    /// Holes variants offered by this slot. `holesDisplay` wins over `holes`.
    fn holes_variants(&self) -> Vec<u32> {
        let from_display: Vec<u32> = self
            .holes_display
            .as_deref()
            .map(|display| {
                display
                    .to_lowercase()
                    .split("or")
                    .filter_map(|part| part.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        if !from_display.is_empty() {
            from_display
        } else {
            self.holes.into_iter().collect()
        }
    }

    /// Green fee for a holes variant, falling back to the first priced tier.
    /// Entries without a price are ignored.
    fn price_for(&self, holes: u32) -> Option<f64> {
        let codes = [
            format!("GreenFee{holes}"),
            format!("Package{holes}"),
            format!("GreenFee{holes}Online"),
        ];
        let priced = || {
            self.sh_item_prices
                .iter()
                .filter_map(|p| p.current_price.map(|price| (p.sh_item_code.as_deref(), price)))
        };
        codes
            .iter()
            .find_map(|code| {
                priced()
                    .find(|(item, _)| *item == Some(code.as_str()))
                    .map(|(_, price)| price)
            })
            .or_else(|| priced().next().map(|(_, price)| price))
    }

    fn start(&self) -> Option<NaiveDateTime> {
        let raw = self.start_time.trim();
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    }
}

/// Client for the subdomain-hosted CPS online reservation API
pub struct CpsClient {
    transport: Arc<RetryingClient>,
    credentials: Option<CpsCredentials>,
    base_url: Option<String>,
    policy: RetryPolicy,
    on_failure: FailurePolicy,
}

impl CpsClient {
    pub fn new(transport: Arc<RetryingClient>, credentials: Option<CpsCredentials>) -> Self {
        Self {
            transport,
            credentials,
            base_url: None,
            policy: RetryPolicy::jittered(5, 10_000, 1_000),
            on_failure: FailurePolicy::TreatAsEmpty,
        }
    }

    /// Send every request to `base_url` instead of `https://{subdomain}.cps.golf`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_failure_policy(mut self, on_failure: FailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    /// Booking root for a subdomain. CPS has no per-slot deep links.
    pub fn booking_root(subdomain: &str) -> String {
        format!("https://{}.cps.golf", subdomain)
    }

    fn origin(&self, subdomain: &str) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| Self::booking_root(subdomain))
    }

    /// Fetch all tee times for one venue and date.
    ///
    /// Exhausted retries resolve through the client's failure policy, so by default a
    /// broken venue yields an empty list.
    #[instrument(skip_all, fields(venue = %venue_name, date = %date))]
    pub async fn fetch_tee_times(
        &self,
        venue_id: i64,
        venue_name: &str,
        attrs: &CpsAttributes,
        date: NaiveDate,
    ) -> Result<Vec<TeeTime>, FetchError> {
        let result = self.try_fetch(venue_id, venue_name, attrs, date).await;
        self.on_failure.resolve(result, venue_name)
    }

    async fn try_fetch(
        &self,
        venue_id: i64,
        venue_name: &str,
        attrs: &CpsAttributes,
        date: NaiveDate,
    ) -> Result<Vec<TeeTime>, FetchError> {
        let origin = self.origin(&attrs.subdomain);
        let mut headers = header_map(&attrs.headers);
        if !headers.contains_key(REFERER) {
            if let Ok(value) = HeaderValue::from_str(&format!("{}/", Self::booking_root(&attrs.subdomain))) {
                headers.insert(REFERER, value);
            }
        }

        if attrs.requires_login {
            match &self.credentials {
                Some(credentials) => {
                    let token = self.access_token(venue_name, &origin, credentials).await?;
                    let value = HeaderValue::from_str(&format!("Bearer {token}"))
                        .map_err(|e| FetchError::parse(venue_name, e.to_string()))?;
                    headers.insert(AUTHORIZATION, value);
                }
                None => warn!(
                    "[{}] venue requires login but no CPS credentials are configured",
                    venue_name
                ),
            }
        }

        let query = search_query(&attrs.params, date);
        let url = format!("{}{}", origin, TEE_TIMES_PATH);
        let response = self
            .transport
            .get(venue_name, &url, &query, &headers, &self.policy)
            .await?;

        let slots: Vec<CpsTeeTime> = match response.json::<CpsTeeTimesResponse>(venue_name)? {
            CpsTeeTimesResponse::Slots(raw) => decode_each(venue_name, raw),
            CpsTeeTimesResponse::Message { message_key } if message_key == NO_TEETIMES => {
                debug!("[{}] no tee times on {}", venue_name, date);
                return Ok(Vec::new());
            }
            CpsTeeTimesResponse::Message { message_key } => {
                return Err(FetchError::parse(
                    venue_name,
                    format!("unexpected message '{message_key}'"),
                ))
            }
        };

        let booking_link = Self::booking_root(&attrs.subdomain);
        let mut tee_times = Vec::with_capacity(slots.len());
        for slot in &slots {
            let Some(start) = slot.start() else {
                warn!("[{}] skipping slot with start time '{}'", venue_name, slot.start_time);
                continue;
            };

            let mut participants = slot.available_participant_no.clone();
            participants.sort_unstable();
            participants.dedup();

            for holes in slot.holes_variants() {
                let Some(price) = slot.price_for(holes) else {
                    warn!("[{}] no price found for {} holes at {}", venue_name, holes, start);
                    continue;
                };
                tee_times.push(TeeTime {
                    tee_time_id: tee_time_id(venue_id, start, holes),
                    start_datetime: start,
                    players_available: slot.available_participant_no.len() as u32,
                    available_participants: participants.clone(),
                    holes,
                    price,
                    booking_link: booking_link.clone(),
                    booking_links: BTreeMap::new(),
                    starting_tee: slot.starting_tee,
                });
            }
        }

        sort_by_start(&mut tee_times);
        Ok(tee_times)
    }

    async fn access_token(
        &self,
        venue_name: &str,
        origin: &str,
        credentials: &CpsCredentials,
    ) -> Result<String, FetchError> {
        let form = [
            ("grant_type", "password"),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string()));

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );

        let url = format!("{}{}", origin, TOKEN_PATH);
        let response = self
            .transport
            .post_form(venue_name, &url, &form, &headers, &self.policy)
            .await?;
        Ok(response.json::<TokenResponse>(venue_name)?.access_token)
    }
}

/// Stored params plus the search date in upstream's `Sun Jun 01 2025` form
fn search_query(params: &BTreeMap<String, serde_json::Value>, date: NaiveDate) -> Vec<(String, String)> {
    let mut query: Vec<(String, String)> = params
        .iter()
        .filter(|(key, _)| key.as_str() != SEARCH_DATE_KEY)
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect();
    query.push((
        SEARCH_DATE_KEY.to_string(),
        date.format("%a %b %d %Y").to_string(),
    ));
    query
}
