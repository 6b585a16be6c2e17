//! Application configuration loaded from environment variables.

use std::time::Duration;

use inventory::CircuitBreakerConfig;
use outbox::PublisherConfig;
use store::OutboxSettings;

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL connection string (required to start)
/// - `DB_POOL_MAX` / `DB_POOL_MIN` — pool bounds (default: 50 / 10)
/// - `DB_IDLE_TIMEOUT_MS` — pooled connection idle timeout (default: 30000)
/// - `DB_CONNECT_TIMEOUT_MS` — connection acquire timeout (default: 10000)
/// - `CB_TIMEOUT_MS`, `CB_FAILURE_THRESHOLD`, `CB_RESET_TIMEOUT_MS` —
///   circuit breaker (defaults: 5000, 5, 30000)
/// - `OUTBOX_POLL_INTERVAL_MS`, `OUTBOX_BATCH_SIZE`, `OUTBOX_MAX_RETRIES`,
///   `OUTBOX_BASE_DELAY_MS`, `OUTBOX_MAX_DELAY_MS` — publisher
///   (defaults: 1000, 50, 5, 100, 1600)
/// - `INVENTORY_FAILURE_RATE_PERCENT` — mock collaborator failure injection
///   (default: 1)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub db_pool_max: u32,
    pub db_pool_min: u32,
    pub db_idle_timeout: Duration,
    pub db_connect_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
    pub publisher: PublisherConfig,
    pub inventory_failure_rate_percent: u8,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let publisher = PublisherConfig {
            poll_interval: Duration::from_millis(env_parsed("OUTBOX_POLL_INTERVAL_MS", 1000)),
            batch_size: env_parsed("OUTBOX_BATCH_SIZE", 50),
            max_retries: env_parsed("OUTBOX_MAX_RETRIES", 5),
            base_delay: Duration::from_millis(env_parsed("OUTBOX_BASE_DELAY_MS", 100)),
            max_delay: Duration::from_millis(env_parsed("OUTBOX_MAX_DELAY_MS", 1600)),
        };

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parsed("PORT", 3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            db_pool_max: env_parsed("DB_POOL_MAX", 50),
            db_pool_min: env_parsed("DB_POOL_MIN", 10),
            db_idle_timeout: Duration::from_millis(env_parsed("DB_IDLE_TIMEOUT_MS", 30_000)),
            db_connect_timeout: Duration::from_millis(env_parsed("DB_CONNECT_TIMEOUT_MS", 10_000)),
            breaker: CircuitBreakerConfig {
                timeout: Duration::from_millis(env_parsed("CB_TIMEOUT_MS", 5000)),
                failure_threshold: env_parsed("CB_FAILURE_THRESHOLD", 5),
                reset_timeout: Duration::from_millis(env_parsed("CB_RESET_TIMEOUT_MS", 30_000)),
            },
            publisher,
            inventory_failure_rate_percent: env_parsed("INVENTORY_FAILURE_RATE_PERCENT", 1),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Outbox lease settings matching the publisher tuning: the same
    /// `max_retries`, and a visibility window covering a poll interval plus
    /// the slowest publish attempt.
    pub fn outbox_settings(&self) -> OutboxSettings {
        let window = self.publisher.poll_interval + self.breaker.timeout + Duration::from_secs(5);
        OutboxSettings {
            max_retries: self.publisher.max_retries,
            lease_window: chrono::Duration::from_std(window)
                .unwrap_or_else(|_| chrono::Duration::seconds(30)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            db_pool_max: 50,
            db_pool_min: 10,
            db_idle_timeout: Duration::from_millis(30_000),
            db_connect_timeout: Duration::from_millis(10_000),
            breaker: CircuitBreakerConfig::default(),
            publisher: PublisherConfig::default(),
            inventory_failure_rate_percent: 1,
        }
    }
}
