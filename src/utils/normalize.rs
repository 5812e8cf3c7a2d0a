use crate::models::TeeTime;
use chrono::NaiveDateTime;
use std::collections::HashMap;

/// One upstream offer for a start time, before it becomes a [`TeeTime`]
#[derive(Debug, Clone, PartialEq)]
pub struct SlotOffer {
    pub start: NaiveDateTime,
    pub upstream_id: u64,
    /// Players the offer can take, as reported by upstream
    pub seats: u32,
    pub price: f64,
}

/// The winning offer for a start time plus every seat count seen for it
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSlot {
    pub offer: SlotOffer,
    pub available_participants: Vec<u32>,
}

/// Stable id for a tee time: venue, date and start minute, plus the holes variant.
pub fn tee_time_id(venue_id: i64, start: NaiveDateTime, holes: u32) -> String {
    format!("{}{}-{}", venue_id, start.format("%Y%m%d%H%M"), holes)
}

/// Merge per-party-size result sets keyed by start time.
///
/// Buckets must be passed in priority order (largest party size first). The first
/// bucket holding a start time wins; later buckets only contribute their seat count
/// to `available_participants`. Output is ordered by start time.
pub fn merge_party_buckets<I>(buckets: I) -> Vec<MergedSlot>
where
    I: IntoIterator<Item = Vec<SlotOffer>>,
{
    let mut index: HashMap<NaiveDateTime, usize> = HashMap::new();
    let mut merged: Vec<MergedSlot> = Vec::new();

    for bucket in buckets {
        for offer in bucket {
            match index.get(&offer.start) {
                Some(&i) => merged[i].available_participants.push(offer.seats),
                None => {
                    index.insert(offer.start, merged.len());
                    merged.push(MergedSlot {
                        available_participants: vec![offer.seats],
                        offer,
                    });
                }
            }
        }
    }

    for slot in &mut merged {
        slot.available_participants.sort_unstable();
        slot.available_participants.dedup();
    }
    merged.sort_by_key(|slot| slot.offer.start);
    merged
}

pub fn sort_by_start(tee_times: &mut [TeeTime]) {
    tee_times.sort_by(|a, b| {
        a.start_datetime
            .cmp(&b.start_datetime)
            .then_with(|| a.holes.cmp(&b.holes))
    });
}
