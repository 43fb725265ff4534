mod availability;
mod conflict;
mod error;
mod state;
mod store;

pub use availability::{generate_slots, merge_windows, open_windows};
pub use error::{EngineError, PolicyError};
pub use store::{BookingStore, SharedLedger, WalStore};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::catalog::{AvailabilityRules, ServiceCatalog};
use crate::limits::MIN_GRANULARITY_MIN;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;

use conflict::{date_of, now_ms, validate_policy, validate_span};

/// The scheduling core's facade: the read path (`list_available_slots`) and
/// the authoritative write path (`create_booking` + lifecycle transitions).
///
/// Stateless beyond its collaborators; holds no locks of its own. Safe to
/// share behind an `Arc` across any number of request handlers.
pub struct Engine {
    rules: Arc<dyn AvailabilityRules>,
    services: Arc<dyn ServiceCatalog>,
    store: Arc<dyn BookingStore>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(
        rules: Arc<dyn AvailabilityRules>,
        services: Arc<dyn ServiceCatalog>,
        store: Arc<dyn BookingStore>,
        notify: Arc<NotifyHub>,
    ) -> Self {
        Self {
            rules,
            services,
            store,
            notify,
        }
    }

    // ── Read path ────────────────────────────────────────

    /// Bookable slots for one service on one date. Lock-free snapshot:
    /// staleness is tolerated and re-validated at commit time.
    ///
    /// `granularity_min` defaults to the service duration; finer steps allow
    /// overlapping start-time choices.
    pub async fn list_available_slots(
        &self,
        business_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        granularity_min: Option<u32>,
    ) -> Result<Vec<TimeSlot>, EngineError> {
        let started = Instant::now();
        let service = self.service_with_retry(service_id).await?;
        if service.business_id != business_id {
            return Err(EngineError::NotFound(service_id));
        }
        let granularity = granularity_min.unwrap_or(service.duration_min);
        if granularity < MIN_GRANULARITY_MIN {
            return Err(EngineError::LimitExceeded("granularity below minimum"));
        }

        let rules = self.rules_with_retry(business_id, date).await?;
        let busy: Vec<Span> = self
            .store
            .find_overlapping(business_id, day_span(date))
            .await?
            .iter()
            .map(|b| b.span)
            .collect();

        let slots = generate_slots(&rules, &busy, &service, date, granularity, now_ms());

        metrics::counter!(observability::SLOT_QUERIES_TOTAL).increment(1);
        metrics::histogram!(observability::SLOT_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(slots)
    }

    // ── Write path ───────────────────────────────────────

    /// Check-and-commit a booking. Either returns a committed,
    /// non-overlapping booking, or fails — `SlotUnavailable` when another
    /// caller won the race, `PolicyViolation` when the request never stood a
    /// chance. Never retried internally.
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        let service = self.services.service(request.service_id).await?;
        if service.business_id != request.business_id {
            return Err(EngineError::NotFound(request.service_id));
        }
        let span = Span {
            start: request.start,
            end: request.start + service.duration_ms(),
        };
        validate_span(&span)?;

        let now = now_ms();
        let rules = self
            .rules
            .rules_for(request.business_id, date_of(request.start).weekday())
            .await?;
        if let Err(e) = validate_policy(&rules, &service, &span, now) {
            metrics::counter!(observability::POLICY_REJECTIONS_TOTAL).increment(1);
            return Err(e);
        }

        let booking = Booking {
            id: Ulid::new(),
            business_id: request.business_id,
            service_id: request.service_id,
            customer_id: request.customer_id,
            span,
            status: service.initial_status(),
            created_at: now,
            idempotency_key: request.idempotency_key,
        };
        let fresh_id = booking.id;

        match self.store.insert_if_no_overlap(booking).await {
            Ok(committed) => {
                // An idempotency-key replay returns the original row; its
                // creation event was already published.
                if committed.id == fresh_id {
                    metrics::counter!(observability::BOOKINGS_TOTAL, "status" => committed.status.as_str())
                        .increment(1);
                    self.notify.send(
                        committed.business_id,
                        &Event::Created {
                            booking: committed.clone(),
                        },
                    );
                    tracing::info!(
                        booking = %committed.id,
                        business = %committed.business_id,
                        status = %committed.status,
                        "booking committed"
                    );
                }
                Ok(committed)
            }
            Err(e) => {
                if let EngineError::SlotUnavailable(_) = e {
                    metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                }
                Err(e)
            }
        }
    }

    // ── Lifecycle ────────────────────────────────────────

    pub async fn confirm_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::Confirmed).await
    }

    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::Cancelled).await
    }

    pub async fn complete_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::Completed).await
    }

    pub async fn mark_no_show(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::NoShow).await
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.store.get(booking_id).await
    }

    async fn transition(&self, booking_id: Ulid, to: BookingStatus) -> Result<Booking, EngineError> {
        let event = self.store.apply_transition(booking_id, to, now_ms()).await?;
        let booking = event.booking().clone();
        metrics::counter!(observability::TRANSITIONS_TOTAL, "event" => event.kind()).increment(1);
        self.notify.send(booking.business_id, &event);
        Ok(booking)
    }

    // ── Maintenance ──────────────────────────────────────

    /// Cancel PENDING bookings the business never approved within `ttl`.
    /// Returns how many were cancelled. Racing approvals are fine: a booking
    /// confirmed between the scan and the cancel simply fails its transition.
    pub async fn sweep_stale_pending(&self, now: Ms, ttl: Duration) -> usize {
        let cutoff = now - ttl.as_millis() as Ms;
        let stale = match self.store.stale_pending(cutoff).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("stale-pending scan failed: {e}");
                return 0;
            }
        };
        let mut cancelled = 0;
        for id in stale {
            match self.cancel_booking(id).await {
                Ok(_) => {
                    cancelled += 1;
                    tracing::info!("swept stale pending booking {id}");
                }
                Err(e) => tracing::debug!("sweep skip {id}: {e}"),
            }
        }
        if cancelled > 0 {
            metrics::counter!(observability::SWEEPER_CANCELLED_TOTAL).increment(cancelled as u64);
        }
        cancelled
    }

    // ── Collaborator fetches ─────────────────────────────

    // Reads are idempotent, so a transient collaborator failure is retried
    // once, transparently. Writes never are.

    async fn rules_with_retry(
        &self,
        business_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityRule>, EngineError> {
        match self.rules.rules_for(business_id, date.weekday()).await {
            Err(e) if e.is_retryable() => self.rules.rules_for(business_id, date.weekday()).await,
            other => other,
        }
    }

    async fn service_with_retry(&self, service_id: Ulid) -> Result<Service, EngineError> {
        match self.services.service(service_id).await {
            Err(e) if e.is_retryable() => self.services.service(service_id).await,
            other => other,
        }
    }
}
