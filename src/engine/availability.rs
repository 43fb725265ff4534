use chrono::NaiveDate;

use crate::limits::MAX_SLOTS_PER_QUERY;
use crate::model::*;

// ── Slot Generation ───────────────────────────────────────────────

/// Merge sorted touching/overlapping windows into maximal disjoint windows.
pub fn merge_windows(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Project the weekly rules that apply on `date` into merged epoch-ms
/// windows, sorted ascending.
pub fn open_windows(rules: &[AvailabilityRule], date: NaiveDate) -> Vec<Span> {
    let mut windows: Vec<Span> = rules
        .iter()
        .filter(|r| r.applies_on(date))
        .map(|r| r.span_on(date))
        .collect();
    windows.sort_by_key(|s| s.start);
    merge_windows(&windows)
}

/// Compute the bookable slots for one service on one date.
///
/// Pure and side-effect-free: callers pass in the rules, the busy spans
/// (active bookings only) and `now`. The result is a snapshot — correctness
/// against races is deferred entirely to booking commit time.
///
/// Candidate starts walk each open window in `granularity_min` steps; a
/// candidate survives if `[t, t+duration)` fits the window, overlaps no busy
/// span, and starts inside the service's advance-booking bounds.
pub fn generate_slots(
    rules: &[AvailabilityRule],
    busy: &[Span],
    service: &Service,
    date: NaiveDate,
    granularity_min: u32,
    now: Ms,
) -> Vec<TimeSlot> {
    debug_assert!(granularity_min > 0, "granularity must be positive");
    let duration = service.duration_ms();
    let step = granularity_min as Ms * MS_PER_MIN;
    let earliest = service.earliest_start(now);
    let latest = service.latest_start(now);

    let mut sorted_busy = busy.to_vec();
    sorted_busy.sort_by_key(|s| s.start);

    let mut slots = Vec::new();
    for window in open_windows(rules, date) {
        let mut t = window.start;
        while t + duration <= window.end {
            let candidate = Span::new(t, t + duration);
            // Busy spans are sorted, so stop scanning once they start past us.
            let clear = sorted_busy
                .iter()
                .take_while(|b| b.start < candidate.end)
                .all(|b| b.end <= candidate.start);
            if clear && t >= earliest && t <= latest {
                slots.push(TimeSlot {
                    business_id: service.business_id,
                    service_id: service.id,
                    span: candidate,
                });
                if slots.len() >= MAX_SLOTS_PER_QUERY {
                    return slots;
                }
            }
            t += step;
        }
    }
    slots
}
