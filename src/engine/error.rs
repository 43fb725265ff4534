use ulid::Ulid;

use crate::model::BookingStatus;

/// Why a request violated scheduling policy, distinct from losing a race so
/// the caller layer can render a different message for each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    /// The requested span lies outside every open window on that day.
    OutsideOpenHours,
    /// The requested start is closer than the service's minimum lead time.
    TooSoon { min_advance_hours: u32 },
    /// The requested start is beyond the service's booking horizon.
    TooFarOut { max_advance_days: u32 },
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::OutsideOpenHours => write!(f, "outside open hours"),
            PolicyError::TooSoon { min_advance_hours } => {
                write!(f, "starts less than {min_advance_hours}h from now")
            }
            PolicyError::TooFarOut { max_advance_days } => {
                write!(f, "starts more than {max_advance_days}d from now")
            }
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    /// Lost the race: an active booking already occupies the interval.
    /// Callers should re-fetch slots and retry with a different time.
    SlotUnavailable(Ulid),
    /// Caller error — the request never stood a chance, conflict or not.
    PolicyViolation(PolicyError),
    /// State-machine misuse, naming the current and requested states.
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// Infrastructure hiccup (e.g. commit timeout) — safe to retry unchanged.
    StoreUnavailable(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// True for failures the caller may retry verbatim. The engine itself
    /// never retries writes, so a genuine double-submit is never masked.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::SlotUnavailable(id) => {
                write!(f, "slot unavailable: conflicts with booking {id}")
            }
            EngineError::PolicyViolation(p) => write!(f, "policy violation: {p}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
