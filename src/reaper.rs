use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, WalStore};
use crate::model::Ms;

fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Background task that auto-cancels PENDING bookings the business never
/// approved within `pending_ttl`, freeing their interval for other customers.
pub async fn run_sweeper(engine: Arc<Engine>, interval: Duration, pending_ttl: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let cancelled = engine.sweep_stale_pending(now_ms(), pending_ttl).await;
        if cancelled > 0 {
            info!("sweeper cancelled {cancelled} stale pending bookings");
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, InMemoryRules};
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::{Datelike, NaiveDate};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotwise_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    /// A date far enough out that every hour of it clears advance policy.
    fn next_week() -> NaiveDate {
        chrono::Utc::now().date_naive() + chrono::Days::new(7)
    }

    /// Engine over a business open every day of the week around `date`.
    async fn engine_with_service(
        wal: &str,
        requires_approval: bool,
        date: NaiveDate,
    ) -> (Arc<Engine>, Service) {
        let rules = Arc::new(InMemoryRules::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let business = Ulid::new();
        let service = Service {
            id: Ulid::new(),
            business_id: business,
            duration_min: 60,
            min_advance_hours: 0,
            max_advance_days: 365,
            requires_approval,
        };
        catalog.insert(service).unwrap();
        rules
            .add(AvailabilityRule {
                id: Ulid::new(),
                business_id: business,
                weekday: date.weekday(),
                start_min: 0,
                end_min: 1440,
            })
            .unwrap();
        let store = Arc::new(
            WalStore::open(&test_wal_path(wal), Duration::from_secs(5)).unwrap(),
        );
        let engine = Arc::new(Engine::new(
            rules,
            catalog,
            store,
            Arc::new(NotifyHub::new()),
        ));
        (engine, service)
    }

    #[tokio::test]
    async fn sweeper_cancels_only_stale_pending() {
        let date = next_week();
        let (engine, service) = engine_with_service("sweep_stale.wal", true, date).await;
        let day = day_span(date);

        let stale = engine
            .create_booking(BookingRequest {
                business_id: service.business_id,
                service_id: service.id,
                customer_id: Ulid::new(),
                start: day.start + 10 * MS_PER_HOUR,
                idempotency_key: None,
            })
            .await
            .unwrap();
        let fresh = engine
            .create_booking(BookingRequest {
                business_id: service.business_id,
                service_id: service.id,
                customer_id: Ulid::new(),
                start: day.start + 12 * MS_PER_HOUR,
                idempotency_key: None,
            })
            .await
            .unwrap();
        assert_eq!(stale.status, BookingStatus::Pending);

        // Sweep as if an hour passed since `stale` was created, with a 30
        // minute TTL; `fresh` is aged the same, so age both and confirm the
        // fresh one first to shield it.
        engine.confirm_booking(fresh.id).await.unwrap();
        let cancelled = engine
            .sweep_stale_pending(stale.created_at + MS_PER_HOUR, Duration::from_secs(30 * 60))
            .await;
        assert_eq!(cancelled, 1);

        assert_eq!(
            engine.get_booking(stale.id).await.unwrap().status,
            BookingStatus::Cancelled
        );
        assert_eq!(
            engine.get_booking(fresh.id).await.unwrap().status,
            BookingStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn sweeper_leaves_young_pending_alone() {
        let date = next_week() + chrono::Days::new(1);
        let (engine, service) = engine_with_service("sweep_young.wal", true, date).await;
        let day = day_span(date);

        let booking = engine
            .create_booking(BookingRequest {
                business_id: service.business_id,
                service_id: service.id,
                customer_id: Ulid::new(),
                start: day.start + 9 * MS_PER_HOUR,
                idempotency_key: None,
            })
            .await
            .unwrap();

        // TTL has not elapsed yet.
        let cancelled = engine
            .sweep_stale_pending(booking.created_at + 1000, Duration::from_secs(30 * 60))
            .await;
        assert_eq!(cancelled, 0);
        assert_eq!(
            engine.get_booking(booking.id).await.unwrap().status,
            BookingStatus::Pending
        );
    }
}
