//! Bus runtime options.

use std::time::Duration;

use saga::UnmatchedSagaPolicy;

/// Options for the bus runtime with sensible defaults.
///
/// Reads from environment variables:
/// - `BUS_WORKERS`: number of concurrent dispatch loops (default: `1`)
/// - `BUS_MIN_BACKOFF_MS`: first idle wait (default: `10`)
/// - `BUS_MAX_BACKOFF_MS`: longest idle wait (default: `1000`)
/// - `BUS_SHUTDOWN_TIMEOUT_SECS`: drain timeout on shutdown (default: `30`)
#[derive(Debug, Clone)]
pub struct BusOptions {
    pub number_of_workers: usize,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub shutdown_timeout: Duration,
    pub unmatched_saga_policy: UnmatchedSagaPolicy,
}

impl BusOptions {
    /// Loads options from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            number_of_workers: env_parse("BUS_WORKERS").unwrap_or(defaults.number_of_workers),
            min_backoff: env_parse("BUS_MIN_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_backoff),
            max_backoff: env_parse("BUS_MAX_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            shutdown_timeout: env_parse("BUS_SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            unmatched_saga_policy: defaults.unmatched_saga_policy,
        }
    }

    pub fn with_workers(mut self, number_of_workers: usize) -> Self {
        self.number_of_workers = number_of_workers;
        self
    }

    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min;
        self.max_backoff = max.max(min);
        self
    }

    pub fn with_unmatched_saga_policy(mut self, policy: UnmatchedSagaPolicy) -> Self {
        self.unmatched_saga_policy = policy;
        self
    }
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            number_of_workers: 1,
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            unmatched_saga_policy: UnmatchedSagaPolicy::Ignore,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
