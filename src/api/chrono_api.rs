use crate::api::transport::{decode_each, RetryPolicy, RetryingClient};
use crate::error::{FailurePolicy, FetchError};
use crate::models::{ChronoAttributes, TeeTime};
use crate::utils::normalize::{merge_party_buckets, tee_time_id, SlotOffer};
use chrono::{NaiveDate, NaiveDateTime};
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const MARKETPLACE_BASE_URL: &str = "https://www.chronogolf.ca";
const BOOKING_BASE_URL: &str = "https://www.chronogolf.ca";
const WIDGET_BASE_URL: &str = "https://www.chronogolf.com";

/// Party sizes queried per (venue, date, holes), in merge priority order
pub const PARTY_SIZES: [u32; 4] = [4, 3, 2, 1];

#[derive(Debug, Deserialize)]
struct ChronoSlot {
    id: u64,
    date: String,
    start_time: String,
    #[serde(default)]
    out_of_capacity: bool,
    #[serde(default)]
    restrictions: Vec<serde_json::Value>,
    #[serde(default)]
    green_fees: Vec<ChronoGreenFee>,
}

#[derive(Debug, Deserialize)]
struct ChronoGreenFee {
    #[serde(default)]
    green_fee: Option<f64>,
}

impl ChronoSlot {
    /// Shown upstream but not actually bookable
    fn is_blocked(&self) -> bool {
        self.out_of_capacity || !self.restrictions.is_empty()
    }

    fn start(&self) -> Option<NaiveDateTime> {
        let raw = format!("{}T{}", self.date.trim(), self.start_time.trim());
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M")
            .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S"))
            .ok()
    }

    fn into_offer(self) -> Option<SlotOffer> {
        let start = self.start()?;
        let price = self.green_fees.first()?.green_fee?;
        Some(SlotOffer {
            start,
            upstream_id: self.id,
            seats: self.green_fees.len() as u32,
            price,
        })
    }
}

/// Client for the Chronogolf (Lightspeed) marketplace API
pub struct ChronoClient {
    transport: Arc<RetryingClient>,
    base_url: String,
    policy: RetryPolicy,
    on_failure: FailurePolicy,
}

impl ChronoClient {
    pub fn new(transport: Arc<RetryingClient>) -> Self {
        Self {
            transport,
            base_url: MARKETPLACE_BASE_URL.to_string(),
            policy: RetryPolicy::jittered(5, 5_000, 1_000),
            on_failure: FailurePolicy::TreatAsEmpty,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Policy applied to each party-size bucket
    pub fn with_failure_policy(mut self, on_failure: FailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    /// Fetch tee times for one holes variant.
    ///
    /// Upstream filters availability by party size, so four requests go out at once
    /// (4, 3, 2 and 1 players) and their results are merged, largest party first.
    #[instrument(skip_all, fields(venue = %venue_name, date = %date, holes = holes))]
    pub async fn fetch_tee_times(
        &self,
        venue_id: i64,
        venue_name: &str,
        attrs: &ChronoAttributes,
        holes: u32,
        date: NaiveDate,
    ) -> Result<Vec<TeeTime>, FetchError> {
        let requests = PARTY_SIZES
            .iter()
            .map(|&party_size| self.fetch_bucket(venue_name, attrs, holes, date, party_size));

        let mut buckets = Vec::with_capacity(PARTY_SIZES.len());
        for (party_size, result) in PARTY_SIZES.iter().zip(join_all(requests).await) {
            let scope = format!("{venue_name} ({party_size} players)");
            buckets.push(self.on_failure.resolve(result, &scope)?);
        }

        let tee_times = merge_party_buckets(buckets)
            .into_iter()
            .map(|merged| {
                let offer = merged.offer;
                let booking_links = merged
                    .available_participants
                    .iter()
                    .map(|&players| {
                        let link = booking_link(attrs, holes, date, players, offer.upstream_id);
                        (players, link)
                    })
                    .collect::<BTreeMap<_, _>>();

                TeeTime {
                    tee_time_id: tee_time_id(venue_id, offer.start, holes),
                    start_datetime: offer.start,
                    players_available: offer.seats,
                    available_participants: merged.available_participants,
                    holes,
                    price: offer.price,
                    booking_link: booking_link(attrs, holes, date, offer.seats, offer.upstream_id),
                    booking_links,
                    starting_tee: None,
                }
            })
            .collect::<Vec<_>>();

        debug!("[{}] {} tee times for {} holes", venue_name, tee_times.len(), holes);
        Ok(tee_times)
    }

    async fn fetch_bucket(
        &self,
        venue_name: &str,
        attrs: &ChronoAttributes,
        holes: u32,
        date: NaiveDate,
        party_size: u32,
    ) -> Result<Vec<SlotOffer>, FetchError> {
        let url = format!("{}/marketplace/clubs/{}/teetimes", self.base_url, attrs.club_id);
        let query = bucket_query(attrs, holes, date, party_size);

        let mut headers = HeaderMap::new();
        let referer = format!(
            "{}/en/club/{}/widget?medium=widget&source=club",
            WIDGET_BASE_URL, attrs.club_id
        );
        if let Ok(value) = HeaderValue::from_str(&referer) {
            headers.insert(REFERER, value);
        }

        let response = self
            .transport
            .get(venue_name, &url, &query, &headers, &self.policy)
            .await?;
        let raw: Vec<serde_json::Value> = response.json(venue_name)?;
        let slots: Vec<ChronoSlot> = decode_each(venue_name, raw);

        let mut offers = Vec::with_capacity(slots.len());
        for slot in slots.into_iter().filter(|s| !s.is_blocked()) {
            let id = slot.id;
            match slot.into_offer() {
                Some(offer) => offers.push(offer),
                None => warn!("[{}] skipping slot {} without start time or fee", venue_name, id),
            }
        }
        Ok(offers)
    }
}

/// Query for one party-size bucket: the affiliation id is repeated once per player.
fn bucket_query(
    attrs: &ChronoAttributes,
    holes: u32,
    date: NaiveDate,
    party_size: u32,
) -> Vec<(String, String)> {
    let mut query = vec![
        ("date".to_string(), date.format("%Y-%m-%d").to_string()),
        ("course_id".to_string(), attrs.course_id.to_string()),
        ("nb_holes".to_string(), holes.to_string()),
    ];
    for _ in 0..party_size {
        query.push((
            "affiliation_type_ids[]".to_string(),
            attrs.affiliation_type_id.to_string(),
        ));
    }
    query
}

/// Deep link into the booking review step for one slot and party size
pub fn booking_link(
    attrs: &ChronoAttributes,
    holes: u32,
    date: NaiveDate,
    players: u32,
    teetime_id: u64,
) -> String {
    let affiliation_ids = vec![attrs.affiliation_type_id.to_string(); players as usize].join(",");
    format!(
        "{}/club/{}/booking/?source=club&medium=widget#/teetime/review?course_id={}&nb_holes={}&date={}&affiliation_type_ids={}&teetime_id={}&is_deal=false&new_user=false",
        BOOKING_BASE_URL,
        attrs.club_link_name,
        attrs.course_id,
        holes,
        date.format("%Y-%m-%d"),
        affiliation_ids,
        teetime_id
    )
}
