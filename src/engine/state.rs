//! Booking lifecycle rules.
//!
//! ```text
//! PENDING ──┬──► CONFIRMED ──┬──► COMPLETED   (after span.end)
//!           │                ├──► NO_SHOW     (after span.start)
//!           │                └──► CANCELLED
//!           └──► CANCELLED
//! ```
//!
//! CANCELLED, COMPLETED and NO_SHOW are terminal.

use crate::model::{BookingStatus, Ms, Span};

use super::EngineError;

/// Validate `from → to` at time `now` for a booking occupying `span`.
/// Time guards are part of legality: completing before the booking ended, or
/// no-showing before it started, is rejected like any other bad transition.
pub(crate) fn validate_transition(
    from: BookingStatus,
    to: BookingStatus,
    span: &Span,
    now: Ms,
) -> Result<(), EngineError> {
    use BookingStatus::*;
    let legal = match (from, to) {
        (Pending, Confirmed) => true,
        (Pending, Cancelled) => true,
        (Confirmed, Cancelled) => true,
        (Confirmed, Completed) => now >= span.end,
        (Confirmed, NoShow) => now >= span.start,
        _ => false,
    };
    if legal {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    const SPAN: Span = Span {
        start: 1000,
        end: 2000,
    };

    fn ok(from: BookingStatus, to: BookingStatus, now: Ms) -> bool {
        validate_transition(from, to, &SPAN, now).is_ok()
    }

    #[test]
    fn pending_transitions() {
        assert!(ok(Pending, Confirmed, 0));
        assert!(ok(Pending, Cancelled, 0));
        assert!(!ok(Pending, Completed, 5000));
        assert!(!ok(Pending, NoShow, 5000));
    }

    #[test]
    fn confirmed_transitions() {
        assert!(ok(Confirmed, Cancelled, 0));
        assert!(ok(Confirmed, Completed, 2000)); // at span.end
        assert!(!ok(Confirmed, Completed, 1999)); // before it ended
        assert!(ok(Confirmed, NoShow, 1000)); // at span.start
        assert!(!ok(Confirmed, NoShow, 999)); // before it started
        assert!(!ok(Confirmed, Pending, 0));
    }

    #[test]
    fn terminal_states_reject_everything() {
        for from in [Cancelled, Completed, NoShow] {
            for to in [Pending, Confirmed, Cancelled, Completed, NoShow] {
                assert!(!ok(from, to, i64::MAX));
            }
        }
    }

    #[test]
    fn cancel_of_cancelled_names_both_states() {
        let err = validate_transition(Cancelled, Cancelled, &SPAN, 0).unwrap_err();
        match err {
            EngineError::InvalidTransition { from, to } => {
                assert_eq!(from, Cancelled);
                assert_eq!(to, Cancelled);
            }
            other => panic!("expected InvalidTransition, got {other}"),
        }
    }

    #[test]
    fn self_transitions_rejected() {
        for s in [Pending, Confirmed] {
            assert!(!ok(s, s, 0));
        }
    }
}
