use chrono::{DateTime, NaiveDate};

use crate::model::*;

use super::availability::open_windows;
use super::{EngineError, PolicyError};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn date_of(t: Ms) -> NaiveDate {
    DateTime::from_timestamp_millis(t)
        .expect("timestamps are range-checked before use")
        .date_naive()
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Re-validate a booking request against live rules and the service's
/// advance-booking policy. Same checks the slot generator applies, so a stale
/// slot list shown to a customer is caught here instead of committed.
///
/// Policy failures are never reported as conflicts.
pub(crate) fn validate_policy(
    rules: &[AvailabilityRule],
    service: &Service,
    span: &Span,
    now: Ms,
) -> Result<(), EngineError> {
    if span.start < service.earliest_start(now) {
        return Err(EngineError::PolicyViolation(PolicyError::TooSoon {
            min_advance_hours: service.min_advance_hours,
        }));
    }
    if span.start > service.latest_start(now) {
        return Err(EngineError::PolicyViolation(PolicyError::TooFarOut {
            max_advance_days: service.max_advance_days,
        }));
    }
    let date = date_of(span.start);
    let covered = open_windows(rules, date)
        .iter()
        .any(|w| w.contains_span(span));
    if !covered {
        return Err(EngineError::PolicyViolation(PolicyError::OutsideOpenHours));
    }
    Ok(())
}

/// The overlap half of "check no overlap, then insert". Callers hold the
/// ledger's write lock, making the whole unit atomic per business.
pub(crate) fn check_no_conflict(ledger: &BusinessLedger, span: &Span) -> Result<(), EngineError> {
    if let Some(existing) = ledger.active_overlapping(span).next() {
        return Err(EngineError::SlotUnavailable(existing.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use ulid::Ulid;

    const H: Ms = MS_PER_HOUR;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn business_hours(business_id: Ulid) -> Vec<AvailabilityRule> {
        vec![AvailabilityRule {
            id: Ulid::new(),
            business_id,
            weekday: Weekday::Mon,
            start_min: 9 * 60,
            end_min: 17 * 60,
        }]
    }

    fn service_for(business_id: Ulid) -> Service {
        Service {
            id: Ulid::new(),
            business_id,
            duration_min: 60,
            min_advance_hours: 1,
            max_advance_days: 30,
            requires_approval: false,
        }
    }

    fn booking_at(span: Span, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            business_id: Ulid::new(),
            service_id: Ulid::new(),
            customer_id: Ulid::new(),
            span,
            status,
            created_at: 0,
            idempotency_key: None,
        }
    }

    #[test]
    fn policy_accepts_in_window_request() {
        let business = Ulid::new();
        let rules = business_hours(business);
        let svc = service_for(business);
        let day = day_span(monday());
        let now = day.start - 12 * H;
        let span = Span::new(day.start + 10 * H, day.start + 11 * H);
        assert!(validate_policy(&rules, &svc, &span, now).is_ok());
    }

    #[test]
    fn policy_rejects_outside_window() {
        let business = Ulid::new();
        let rules = business_hours(business);
        let svc = service_for(business);
        let day = day_span(monday());
        let now = day.start - 12 * H;
        // 18:00 start, after close
        let span = Span::new(day.start + 18 * H, day.start + 19 * H);
        let err = validate_policy(&rules, &svc, &span, now).unwrap_err();
        assert!(matches!(
            err,
            EngineError::PolicyViolation(PolicyError::OutsideOpenHours)
        ));
    }

    #[test]
    fn policy_rejects_window_overrun() {
        // Starts inside but runs past close: not covered.
        let business = Ulid::new();
        let rules = business_hours(business);
        let svc = service_for(business);
        let day = day_span(monday());
        let now = day.start - 12 * H;
        let span = Span::new(day.start + 16 * H + 30 * MS_PER_MIN, day.start + 17 * H + 30 * MS_PER_MIN);
        let err = validate_policy(&rules, &svc, &span, now).unwrap_err();
        assert!(matches!(
            err,
            EngineError::PolicyViolation(PolicyError::OutsideOpenHours)
        ));
    }

    #[test]
    fn policy_accepts_span_ending_at_close() {
        // Half-open: [16:00, 17:00) against a window closing at 17:00.
        let business = Ulid::new();
        let rules = business_hours(business);
        let svc = service_for(business);
        let day = day_span(monday());
        let now = day.start - 12 * H;
        let span = Span::new(day.start + 16 * H, day.start + 17 * H);
        assert!(validate_policy(&rules, &svc, &span, now).is_ok());
    }

    #[test]
    fn policy_rejects_too_soon() {
        let business = Ulid::new();
        let rules = business_hours(business);
        let svc = service_for(business); // 1h lead time
        let day = day_span(monday());
        let now = day.start + 9 * H + 30 * MS_PER_MIN;
        let span = Span::new(day.start + 10 * H, day.start + 11 * H);
        let err = validate_policy(&rules, &svc, &span, now).unwrap_err();
        assert!(matches!(
            err,
            EngineError::PolicyViolation(PolicyError::TooSoon { .. })
        ));
    }

    #[test]
    fn policy_rejects_too_far_out() {
        let business = Ulid::new();
        let rules = business_hours(business);
        let mut svc = service_for(business);
        svc.max_advance_days = 7;
        let day = day_span(monday());
        let now = day.start - 30 * 24 * H;
        let span = Span::new(day.start + 10 * H, day.start + 11 * H);
        let err = validate_policy(&rules, &svc, &span, now).unwrap_err();
        assert!(matches!(
            err,
            EngineError::PolicyViolation(PolicyError::TooFarOut { .. })
        ));
    }

    #[test]
    fn conflict_detects_active_overlap() {
        let mut ledger = BusinessLedger::new(Ulid::new());
        let existing = booking_at(Span::new(1000, 2000), BookingStatus::Confirmed);
        let existing_id = existing.id;
        ledger.insert(existing);

        let err = check_no_conflict(&ledger, &Span::new(1500, 2500)).unwrap_err();
        match err {
            EngineError::SlotUnavailable(id) => assert_eq!(id, existing_id),
            other => panic!("expected SlotUnavailable, got {other}"),
        }
    }

    #[test]
    fn conflict_ignores_cancelled() {
        let mut ledger = BusinessLedger::new(Ulid::new());
        ledger.insert(booking_at(Span::new(1000, 2000), BookingStatus::Cancelled));
        assert!(check_no_conflict(&ledger, &Span::new(1000, 2000)).is_ok());
    }

    #[test]
    fn back_to_back_bookings_do_not_conflict() {
        let mut ledger = BusinessLedger::new(Ulid::new());
        ledger.insert(booking_at(Span::new(1000, 2000), BookingStatus::Confirmed));
        assert!(check_no_conflict(&ledger, &Span::new(2000, 3000)).is_ok());
        assert!(check_no_conflict(&ledger, &Span::new(0, 1000)).is_ok());
    }

    #[test]
    fn span_limits() {
        assert!(validate_span(&Span::new(1_700_000_000_000, 1_700_000_060_000)).is_ok());
        assert!(validate_span(&Span::new(100, 200)).is_err()); // prehistoric
        let wide = Span::new(1_700_000_000_000, 1_700_000_000_000 + 8 * MS_PER_DAY);
        assert!(validate_span(&wide).is_err());
    }
}
