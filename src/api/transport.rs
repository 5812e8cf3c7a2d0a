//! Retrying HTTP transport shared by every upstream client.
//!
//! Wraps `reqwest` with:
//! - a desktop-browser header signature
//! - retry with jittered or exponential backoff
//! - optional round-robin proxy rotation

use crate::error::FetchError;
use rand::Rng;
use serde::de::DeserializeOwned;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.5 Safari/605.1.15";
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Sleep `min_delay + random(0..=max_delay)`
    Jittered,
    /// Sleep `min(base * 2^attempt + random(0..=base), max_delay)`
    Exponential { base: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn jittered(max_retries: u32, max_delay_ms: u64, min_delay_ms: u64) -> Self {
        Self {
            max_retries,
            min_delay: Duration::from_millis(min_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            backoff: Backoff::Jittered,
        }
    }

    pub fn exponential(max_retries: u32, base: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            min_delay: Duration::ZERO,
            max_delay,
            backoff: Backoff::Exponential { base },
        }
    }

    /// No sleeping between attempts. Tests only need the attempt count.
    pub fn immediate(max_retries: u32) -> Self {
        Self::jittered(max_retries, 0, 0)
    }

    /// Delay after the failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut rng = rand::rng();
        match self.backoff {
            Backoff::Jittered => {
                let jitter = rng.random_range(0..=millis(self.max_delay));
                self.min_delay + Duration::from_millis(jitter)
            }
            Backoff::Exponential { base } => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                let scaled = millis(base).saturating_mul(factor);
                let jitter = rng.random_range(0..=millis(base));
                Duration::from_millis(scaled.saturating_add(jitter).min(millis(self.max_delay)))
            }
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Outbound proxy pool. Each request independently rolls whether to use a proxy;
/// the proxy itself is picked round-robin.
#[derive(Debug)]
pub struct ProxyRotation {
    clients: Vec<Client>,
    next: AtomicUsize,
    probability: f64,
}

impl ProxyRotation {
    pub fn new(urls: &[String], probability: f64, timeout: Duration) -> Result<Self, FetchError> {
        let clients = urls
            .iter()
            .map(|url| {
                Client::builder()
                    .timeout(timeout)
                    .proxy(reqwest::Proxy::all(url)?)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
            probability,
        })
    }

    pub fn disabled() -> Self {
        Self {
            clients: Vec::new(),
            next: AtomicUsize::new(0),
            probability: 0.0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.clients.is_empty() && self.probability > 0.0
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn next_index(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len()
    }

    /// Roll for a proxy; `None` means go direct.
    fn pick(&self) -> Option<&Client> {
        if !self.is_enabled() {
            return None;
        }
        if rand::rng().random_bool(self.probability.min(1.0)) {
            Some(&self.clients[self.next_index()])
        } else {
            None
        }
    }
}

/// Successful upstream response, body already read
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
    pub via_proxy: bool,
}

impl UpstreamResponse {
    pub fn json<T: DeserializeOwned>(&self, label: &str) -> Result<T, FetchError> {
        serde_json::from_str(&self.body).map_err(|e| FetchError::parse(label, e.to_string()))
    }
}

/// Decode list items one by one, skipping (and logging) the ones that don't fit `T`.
pub fn decode_each<T: DeserializeOwned>(label: &str, items: Vec<serde_json::Value>) -> Vec<T> {
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("[{}] skipping malformed item {}: {}", label, index, e);
                None
            }
        })
        .collect();
    if decoded.len() < total {
        debug!("[{}] decoded {} of {} items", label, decoded.len(), total);
    }
    decoded
}

pub struct RetryingClient {
    direct: Client,
    proxies: ProxyRotation,
}

impl RetryingClient {
    pub fn new(timeout: Duration, proxies: ProxyRotation) -> Result<Self, FetchError> {
        let direct = Client::builder().timeout(timeout).build()?;
        Ok(Self { direct, proxies })
    }

    /// Direct client, no proxies. Used by tests and the forecast pipeline.
    pub fn direct(timeout: Duration) -> Result<Self, FetchError> {
        Self::new(timeout, ProxyRotation::disabled())
    }

    pub fn proxies(&self) -> &ProxyRotation {
        &self.proxies
    }

    #[instrument(skip_all, fields(label = %label, url = %url))]
    pub async fn get(
        &self,
        label: &str,
        url: &str,
        query: &[(String, String)],
        headers: &HeaderMap,
        policy: &RetryPolicy,
    ) -> Result<UpstreamResponse, FetchError> {
        let headers = with_browser_headers(headers);
        self.execute(label, policy, |client| {
            client.get(url).query(query).headers(headers.clone())
        })
        .await
    }

    #[instrument(skip_all, fields(label = %label, url = %url))]
    pub async fn post_form(
        &self,
        label: &str,
        url: &str,
        form: &[(String, String)],
        headers: &HeaderMap,
        policy: &RetryPolicy,
    ) -> Result<UpstreamResponse, FetchError> {
        let headers = with_browser_headers(headers);
        self.execute(label, policy, |client| {
            client.post(url).form(form).headers(headers.clone())
        })
        .await
    }

    /// Fire a single GET and ignore the outcome apart from logging it.
    pub async fn ping(&self, url: &str) {
        match self.direct.get(url).send().await {
            Ok(resp) => debug!("Health check ping returned {}", resp.status()),
            Err(e) => warn!("Health check ping to {} failed: {}", url, e),
        }
    }

    async fn execute<F>(
        &self,
        label: &str,
        policy: &RetryPolicy,
        build: F,
    ) -> Result<UpstreamResponse, FetchError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        // The proxy decision is made once per logical request, not per attempt.
        let proxy = self.proxies.pick();
        let via_proxy = proxy.is_some();
        let client = proxy.unwrap_or(&self.direct);

        let attempts = policy.max_retries.max(1);
        let mut last_status = None;
        let mut last_body = String::new();

        for attempt in 1..=attempts {
            let failure = match build(client).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        match resp.text().await {
                            Ok(body) => {
                                return Ok(UpstreamResponse {
                                    status: status.as_u16(),
                                    body,
                                    via_proxy,
                                })
                            }
                            // Connection dropped mid-body: a failed attempt like any other
                            Err(e) => FetchError::network(label, format!("failed to read body: {e}")),
                        }
                    } else {
                        let body = resp
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unable to read response body".to_string());
                        FetchError::Status {
                            label: label.to_string(),
                            status: status.as_u16(),
                            body: truncate(&body),
                        }
                    }
                }
                Err(e) => FetchError::network(label, e.to_string()),
            };

            if let FetchError::Status { status, body, .. } = &failure {
                last_status = Some(*status);
                last_body = body.clone();
            } else {
                last_body = failure.to_string();
            }

            if attempt < attempts {
                let delay = policy.delay_for(attempt - 1);
                debug!(
                    "{} (attempt {}/{}), retrying in {:?}",
                    failure, attempt, attempts, delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        let proxy_status = if via_proxy { "with-proxy" } else { "without-proxy" };
        warn!(
            "[{}] giving up after {} attempts, last status {:?} {}",
            label, attempts, last_status, proxy_status
        );
        Err(FetchError::Exhausted {
            label: label.to_string(),
            attempts,
            status: last_status,
            body: last_body,
            via_proxy,
        })
    }
}

/// Browser signature first, caller-supplied headers override it.
pub fn with_browser_headers(extra: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-CA,en-US;q=0.9,en;q=0.8"),
    );
    headers.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip, deflate, br"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));

    for (name, value) in extra {
        headers.insert(name.clone(), value.clone());
    }
    headers
}

/// Convert a stored string map into headers, skipping entries that are not valid HTTP.
pub fn header_map(pairs: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Skipping invalid header '{}'", name),
        }
    }
    headers
}

fn truncate(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY {
        let mut cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        cut.push_str("...");
        cut
    } else {
        body.to_string()
    }
}
