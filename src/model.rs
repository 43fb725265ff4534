use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

pub const MS_PER_MIN: Ms = 60_000;
pub const MS_PER_HOUR: Ms = 3_600_000;
pub const MS_PER_DAY: Ms = 86_400_000;
pub const MINUTES_PER_DAY: u32 = 1440;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// The whole calendar day holding `date`, as a UTC span.
pub fn day_span(date: NaiveDate) -> Span {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
        .timestamp_millis();
    Span::new(midnight, midnight + MS_PER_DAY)
}

/// A recurring weekly open window during which a business accepts bookings.
/// Owned and mutated by the business-management side; read-only here, fetched
/// fresh per call so the core never caches stale availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub business_id: Ulid,
    pub weekday: Weekday,
    /// Minutes since midnight, `start_min < end_min <= 1440`.
    pub start_min: u32,
    pub end_min: u32,
}

impl AvailabilityRule {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.start_min >= self.end_min {
            return Err("rule window must start before it ends");
        }
        if self.end_min > MINUTES_PER_DAY {
            return Err("rule window exceeds the day");
        }
        Ok(())
    }

    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.weekday == date.weekday()
    }

    /// Project this weekly window onto a concrete date as a UTC epoch span.
    pub fn span_on(&self, date: NaiveDate) -> Span {
        let day = day_span(date);
        Span::new(
            day.start + self.start_min as Ms * MS_PER_MIN,
            day.start + self.end_min as Ms * MS_PER_MIN,
        )
    }
}

/// A bookable service and its scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub business_id: Ulid,
    /// Slot length. Must be > 0.
    pub duration_min: u32,
    /// Customers may not book closer to now than this.
    pub min_advance_hours: u32,
    /// Customers may not book further out than this.
    pub max_advance_days: u32,
    /// New bookings start PENDING (business approves) instead of CONFIRMED.
    pub requires_approval: bool,
}

impl Service {
    pub fn duration_ms(&self) -> Ms {
        self.duration_min as Ms * MS_PER_MIN
    }

    pub fn earliest_start(&self, now: Ms) -> Ms {
        now + self.min_advance_hours as Ms * MS_PER_HOUR
    }

    pub fn latest_start(&self, now: Ms) -> Ms {
        now + self.max_advance_days as Ms * MS_PER_DAY
    }

    pub fn initial_status(&self) -> BookingStatus {
        if self.requires_approval {
            BookingStatus::Pending
        } else {
            BookingStatus::Confirmed
        }
    }
}

/// A concrete, dated, bookable interval. Derived on every read, never
/// persisted — correctness against races is deferred to booking commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl BookingStatus {
    /// Active bookings occupy their interval; everything else frees it.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled | BookingStatus::Completed | BookingStatus::NoShow
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
            BookingStatus::NoShow => "no_show",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central mutable entity. Never deleted: cancelled rows stay in the
/// ledger for audit while their interval becomes bookable again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub customer_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub created_at: Ms,
    /// Client-supplied key making create retries safe; unique per store.
    pub idempotency_key: Option<String>,
}

/// What a caller submits to book a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub customer_id: Ulid,
    pub start: Ms,
    pub idempotency_key: Option<String>,
}

/// All bookings for one business, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct BusinessLedger {
    pub business_id: Ulid,
    pub bookings: Vec<Booking>,
}

impl BusinessLedger {
    pub fn new(business_id: Ulid) -> Self {
        Self {
            business_id,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose span overlaps the query window, any status.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Only the overlapping bookings that currently occupy their interval.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.status.is_active())
    }
}

/// The event types — flat, no nesting. This is both the WAL record format and
/// the outbound domain-event payload: each variant carries the booking
/// snapshot after the change it records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Created { booking: Booking },
    Confirmed { booking: Booking },
    Cancelled { booking: Booking },
    Completed { booking: Booking },
    NoShow { booking: Booking },
}

impl Event {
    pub fn booking(&self) -> &Booking {
        match self {
            Event::Created { booking }
            | Event::Confirmed { booking }
            | Event::Cancelled { booking }
            | Event::Completed { booking }
            | Event::NoShow { booking } => booking,
        }
    }

    /// Bus topic for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Created { .. } => "booking.created",
            Event::Confirmed { .. } => "booking.confirmed",
            Event::Cancelled { .. } => "booking.cancelled",
            Event::Completed { .. } => "booking.completed",
            Event::NoShow { .. } => "booking.no_show",
        }
    }
}
