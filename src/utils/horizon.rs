use crate::models::Venue;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};

/// Minutes since local midnight, the granularity of the visibility gate
pub fn minutes_since_midnight(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Parse `HH:MM` or `HH:MM:SS`
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

/// Dates `today ..= today + visibility_days`.
///
/// When a gate is set, the last day is dropped while `local_time` is still before it.
/// At exactly the gate minute the day is included.
pub fn booking_horizon(
    today: NaiveDate,
    local_time: NaiveTime,
    visibility_days: u32,
    gate: Option<NaiveTime>,
) -> Vec<NaiveDate> {
    let gated = gate
        .map(|g| minutes_since_midnight(local_time) < minutes_since_midnight(g))
        .unwrap_or(false);
    let last = if gated {
        visibility_days.checked_sub(1)
    } else {
        Some(visibility_days)
    };

    match last {
        Some(last) => (0..=last)
            .map(|offset| today + Duration::days(i64::from(offset)))
            .collect(),
        None => Vec::new(),
    }
}

/// Horizon for a venue, evaluated in the venue's own timezone.
///
/// `now` is converted with chrono-tz, which maps every UTC instant to exactly one
/// local wall-clock time, so DST transitions never produce ambiguous "today" values.
/// On a spring-forward day the skipped hour simply never shows up as local time.
pub fn venue_horizon(venue: &Venue, now: DateTime<Utc>) -> Vec<NaiveDate> {
    let local = now.with_timezone(&venue.timezone).naive_local();
    booking_horizon(
        local.date(),
        local.time(),
        venue.booking_visibility_days,
        venue.booking_visibility_start_time,
    )
}
