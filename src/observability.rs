use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings committed. Labels: status.
pub const BOOKINGS_TOTAL: &str = "slotwise_bookings_total";

/// Counter: create attempts that lost the race to another booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotwise_booking_conflicts_total";

/// Counter: create attempts rejected by availability or advance policy.
pub const POLICY_REJECTIONS_TOTAL: &str = "slotwise_policy_rejections_total";

/// Counter: committed lifecycle transitions. Labels: event.
pub const TRANSITIONS_TOTAL: &str = "slotwise_transitions_total";

/// Counter: slot-availability queries served.
pub const SLOT_QUERIES_TOTAL: &str = "slotwise_slot_queries_total";

/// Histogram: slot-query latency in seconds.
pub const SLOT_QUERY_DURATION_SECONDS: &str = "slotwise_slot_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: PENDING bookings auto-cancelled by the sweeper.
pub const SWEEPER_CANCELLED_TOTAL: &str = "slotwise_sweeper_cancelled_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if port
/// is None. Hosts call this once at startup.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install the default fmt tracing subscriber. Hosts that bring their own
/// subscriber skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
