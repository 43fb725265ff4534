use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded from `SLOTWISE_*` environment variables by
/// hosts at startup. Everything is explicit and typed — there is no dynamic
/// settings blob to interpret at request time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the booking WAL.
    pub data_dir: PathBuf,
    /// Upper bound on one store commit; beyond it the call fails as
    /// retryable rather than blocking the request handler.
    pub commit_timeout: Duration,
    /// PENDING bookings unapproved for this long are auto-cancelled.
    pub pending_ttl: Duration,
    /// How often the sweeper scans for stale PENDING bookings.
    pub sweep_interval: Duration,
    /// Compact the WAL once this many appends accumulate.
    pub compact_threshold: u64,
    /// Prometheus exporter port; None disables metrics.
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            commit_timeout: Duration::from_secs(5),
            pending_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("SLOTWISE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            commit_timeout: env_parse("SLOTWISE_COMMIT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.commit_timeout),
            pending_ttl: env_parse("SLOTWISE_PENDING_TTL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.pending_ttl),
            sweep_interval: env_parse("SLOTWISE_SWEEP_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            compact_threshold: env_parse("SLOTWISE_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: env_parse("SLOTWISE_METRICS_PORT"),
        }
    }

    /// WAL location inside the data directory.
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
