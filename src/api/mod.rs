pub mod chrono_api;
pub mod cps_api;
pub mod transport;
pub mod weather_api;

use crate::error::{FailurePolicy, FetchError};
use crate::models::{TeeTime, Venue, VenueIntegration};
use crate::utils::normalize::sort_by_start;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;

pub use chrono_api::ChronoClient;
pub use cps_api::CpsClient;
pub use transport::{ProxyRotation, RetryPolicy, RetryingClient};
pub use weather_api::OpenMeteoClient;

/// Anything that can produce the tee times of one venue on one date.
#[async_trait]
pub trait TeeTimeSource: Send + Sync {
    async fn fetch_tee_times(
        &self,
        venue: &Venue,
        date: NaiveDate,
    ) -> Result<Vec<TeeTime>, FetchError>;
}

/// Routes each venue to the client for its integration family.
pub struct UpstreamClients {
    pub cps: CpsClient,
    pub chrono: ChronoClient,
    /// Applied to each holes variant of a Chronogolf venue
    pub on_variant_failure: FailurePolicy,
}

impl UpstreamClients {
    pub fn new(cps: CpsClient, chrono: ChronoClient) -> Self {
        Self {
            cps,
            chrono,
            on_variant_failure: FailurePolicy::TreatAsEmpty,
        }
    }
}

#[async_trait]
impl TeeTimeSource for UpstreamClients {
    async fn fetch_tee_times(
        &self,
        venue: &Venue,
        date: NaiveDate,
    ) -> Result<Vec<TeeTime>, FetchError> {
        match &venue.integration {
            VenueIntegration::Cps(attrs) => {
                self.cps
                    .fetch_tee_times(venue.id, &venue.name, attrs, date)
                    .await
            }
            VenueIntegration::ChronoLightspeed(attrs) => {
                let variants = attrs.course_holes.iter().map(|&holes| {
                    self.chrono
                        .fetch_tee_times(venue.id, &venue.name, attrs, holes, date)
                });
                let results = join_all(variants).await;

                let mut tee_times = Vec::new();
                for (holes, result) in attrs.course_holes.iter().zip(results) {
                    let scope = format!("{} ({} holes)", venue.name, holes);
                    tee_times.extend(self.on_variant_failure.resolve(result, &scope)?);
                }
                sort_by_start(&mut tee_times);
                Ok(tee_times)
            }
        }
    }
}
