use crate::api::TeeTimeSource;
use crate::error::FailurePolicy;
use crate::models::{ResultGroup, Venue};
use crate::utils::horizon::venue_horizon;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// One (venue, date) pair to fetch
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub venue: Arc<Venue>,
    pub date: NaiveDate,
}

/// Completed/total counter. Observing it never changes scheduling.
#[derive(Debug)]
pub struct Progress {
    completed: AtomicUsize,
    total: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
        }
    }

    /// Mark one item done and return the new completed count.
    pub fn tick(&self) -> usize {
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Expand every venue into its (venue, date) work items for the current instant.
pub fn plan_work(venues: &[Venue], now: DateTime<Utc>) -> Vec<WorkItem> {
    venues
        .iter()
        .flat_map(|venue| {
            let venue = Arc::new(venue.clone());
            venue_horizon(&venue, now)
                .into_iter()
                .map(move |date| WorkItem {
                    venue: Arc::clone(&venue),
                    date,
                })
        })
        .collect()
}

/// Fetch one work item. Upstream failures become an empty group.
pub async fn fetch_group<S>(source: &S, item: &WorkItem) -> ResultGroup
where
    S: TeeTimeSource + ?Sized,
{
    let scope = format!("{} on {}", item.venue.name, item.date);
    let result = source.fetch_tee_times(&item.venue, item.date).await;
    let tee_times = FailurePolicy::TreatAsEmpty
        .resolve(result, &scope)
        .unwrap_or_default();

    ResultGroup {
        venue_id: item.venue.id,
        date: item.date,
        tee_times,
    }
}

/// Fetch every (venue, date) pair concurrently and wait for all of them.
///
/// `max_concurrency` of `None` runs every pair at once. Groups come back ordered by
/// venue id and date.
pub async fn fetch_all<S>(
    source: &S,
    venues: &[Venue],
    now: DateTime<Utc>,
    max_concurrency: Option<usize>,
) -> Vec<ResultGroup>
where
    S: TeeTimeSource + ?Sized,
{
    let items = plan_work(venues, now);
    let progress = Progress::new(items.len());
    let limit = max_concurrency.unwrap_or(items.len()).max(1);

    info!(
        "Fetching {} venue/date pairs across {} venues",
        progress.total(),
        venues.len()
    );

    // Collected before streaming so the mapping closure stays out of the stream type;
    // otherwise rustc cannot prove the run future `Send` for axum. Futures are inert
    // until polled, so building them up front changes nothing.
    let fetches: Vec<_> = items
        .iter()
        .map(|item| {
            let progress = &progress;
            async move {
                let group = fetch_group(source, item).await;
                let done = progress.tick();
                debug!(
                    "Progress: {}/{} ({} tee times for {} on {})",
                    done,
                    progress.total(),
                    group.tee_times_count(),
                    item.venue.name,
                    item.date
                );
                group
            }
        })
        .collect();
    let mut groups: Vec<ResultGroup> = stream::iter(fetches)
        .buffer_unordered(limit)
        .collect()
        .await;

    groups.sort_by_key(|g| (g.venue_id, g.date));
    info!("Fetched {}/{} venue/date pairs", progress.completed(), progress.total());
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::models::{CpsAttributes, TeeTime, VenueIntegration};
    use async_trait::async_trait;
    use chrono::{NaiveTime, TimeZone};
    use std::collections::BTreeMap;

    struct OneSlotPerDay;

    #[async_trait]
    impl TeeTimeSource for OneSlotPerDay {
        async fn fetch_tee_times(
            &self,
            venue: &Venue,
            date: NaiveDate,
        ) -> Result<Vec<TeeTime>, FetchError> {
            if venue.id == 99 {
                return Err(FetchError::network(&venue.name, "connection reset"));
            }
            let start = date.and_hms_opt(8, 0, 0).unwrap();
            Ok(vec![TeeTime {
                tee_time_id: format!("{}-{}", venue.id, date),
                start_datetime: start,
                players_available: 4,
                available_participants: vec![4],
                holes: 18,
                price: 50.0,
                booking_link: String::new(),
                booking_links: BTreeMap::new(),
                starting_tee: None,
            }])
        }
    }

    fn venue(id: i64, days: u32, gate: Option<NaiveTime>) -> Venue {
        Venue {
            id,
            name: format!("Venue {id}"),
            city: None,
            timezone: chrono_tz::UTC,
            booking_visibility_days: days,
            booking_visibility_start_time: gate,
            integration: VenueIntegration::Cps(CpsAttributes::default()),
        }
    }

    #[test]
    fn test_plan_work_respects_gate() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap();
        let gate = NaiveTime::from_hms_opt(14, 0, 0);
        let items = plan_work(&[venue(1, 3, gate), venue(2, 1, None)], now);
        let for_venue = |id| items.iter().filter(|i| i.venue.id == id).count();
        assert_eq!(for_venue(1), 3);
        assert_eq!(for_venue(2), 2);
    }

    #[tokio::test]
    async fn test_one_group_per_pair_and_failures_are_empty() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let venues = [venue(1, 2, None), venue(99, 1, None)];

        for limit in [None, Some(1)] {
            let groups = fetch_all(&OneSlotPerDay, &venues, now, limit).await;
            assert_eq!(groups.len(), 5);
            assert!(groups
                .iter()
                .filter(|g| g.venue_id == 1)
                .all(|g| g.tee_times_count() == 1));
            assert!(groups
                .iter()
                .filter(|g| g.venue_id == 99)
                .all(|g| g.tee_times.is_empty()));
            assert_eq!(groups[0].date, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        }
    }

    #[test]
    fn test_progress_counts_up() {
        let progress = Progress::new(3);
        assert_eq!(progress.tick(), 1);
        assert_eq!(progress.tick(), 2);
        assert_eq!(progress.completed(), 2);
        assert_eq!(progress.total(), 3);
    }
}
