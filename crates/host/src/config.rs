//! Host configuration loaded from environment variables.

use bus::BusOptions;

/// Host configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `BUS_INPUT_QUEUE`: the bus's input queue (default: `"host"`)
/// - `DATABASE_URL`: PostgreSQL saga storage; in-memory when unset
/// - `FAULT_COMMIT_PROBABILITY`: chance a received message fails to commit
///   (default: `0`, no fault injection)
/// - `DEMO_MESSAGES`: demo invoices sent at startup (default: `0`)
///
/// Bus runtime options come from [`BusOptions::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub input_queue: String,
    pub database_url: Option<String>,
    pub fault_commit_probability: f64,
    pub demo_messages: u32,
    pub bus: BusOptions,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            input_queue: std::env::var("BUS_INPUT_QUEUE").unwrap_or(defaults.input_queue),
            database_url: std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            fault_commit_probability: env_parse::<f64>("FAULT_COMMIT_PROBABILITY")
                .map(|p| p.clamp(0.0, 1.0))
                .unwrap_or(defaults.fault_commit_probability),
            demo_messages: env_parse("DEMO_MESSAGES").unwrap_or(defaults.demo_messages),
            bus: BusOptions::from_env(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            input_queue: "host".to_string(),
            database_url: None,
            fault_commit_probability: 0.0,
            demo_messages: 0,
            bus: BusOptions::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
