//! Runtime configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use bus::ConsumerConfig;
use outbox::PublisherConfig;
use payment::{BreakerConfig, RetryPolicy};

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL` — Postgres connection string (unset: in-memory store)
/// - `OUTBOX_POLL_INTERVAL_MS` — outbox poll period (default: `5000`)
/// - `OUTBOX_BATCH_SIZE` — events claimed per cycle (default: `10`)
/// - `OUTBOX_CLAIM_LEASE_SECS` — claim lease (default: `60`)
/// - `PUBLISH_TIMEOUT_SECS` — broker ack deadline (default: `10`)
/// - `PAYMENT_MAX_ATTEMPTS` — charge attempt budget (default: `3`)
/// - `PAYMENT_BASE_DELAY_MS` — first backoff ceiling (default: `500`)
/// - `PAYMENT_BACKOFF_MULTIPLIER` — delay growth factor (default: `2.0`)
/// - `PAYMENT_MAX_DELAY_SECS` — backoff cap (default: `10`)
/// - `BREAKER_FAILURE_THRESHOLD` — failures that trip the breaker (default: `5`)
/// - `BREAKER_WINDOW_SECS` — rolling failure window (default: `60`)
/// - `BREAKER_COOLDOWN_SECS` — open-state cooldown (default: `30`)
/// - `CONSUMER_MAX_REDELIVERIES` — in-place redeliveries (default: `5`)
/// - `CONSUMER_REDELIVERY_DELAY_MS` — pause between them (default: `500`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    pub outbox_claim_lease: Duration,
    pub publish_timeout: Duration,
    pub payment_max_attempts: u32,
    pub payment_base_delay: Duration,
    pub payment_backoff_multiplier: f64,
    pub payment_max_delay: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_window: Duration,
    pub breaker_cooldown: Duration,
    pub consumer_max_redeliveries: u32,
    pub consumer_redelivery_delay: Duration,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            outbox_poll_interval: Duration::from_millis(env_parse(
                "OUTBOX_POLL_INTERVAL_MS",
                5000,
            )),
            outbox_batch_size: env_parse("OUTBOX_BATCH_SIZE", 10),
            outbox_claim_lease: Duration::from_secs(env_parse("OUTBOX_CLAIM_LEASE_SECS", 60)),
            publish_timeout: Duration::from_secs(env_parse("PUBLISH_TIMEOUT_SECS", 10)),
            payment_max_attempts: env_parse("PAYMENT_MAX_ATTEMPTS", 3),
            payment_base_delay: Duration::from_millis(env_parse("PAYMENT_BASE_DELAY_MS", 500)),
            payment_backoff_multiplier: env_parse("PAYMENT_BACKOFF_MULTIPLIER", 2.0),
            payment_max_delay: Duration::from_secs(env_parse("PAYMENT_MAX_DELAY_SECS", 10)),
            breaker_failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", 5),
            breaker_window: Duration::from_secs(env_parse("BREAKER_WINDOW_SECS", 60)),
            breaker_cooldown: Duration::from_secs(env_parse("BREAKER_COOLDOWN_SECS", 30)),
            consumer_max_redeliveries: env_parse("CONSUMER_MAX_REDELIVERIES", 5),
            consumer_redelivery_delay: Duration::from_millis(env_parse(
                "CONSUMER_REDELIVERY_DELAY_MS",
                500,
            )),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Publisher tuning derived from this config.
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            poll_interval: self.outbox_poll_interval,
            batch_size: self.outbox_batch_size,
            claim_lease: self.outbox_claim_lease,
            publish_timeout: self.publish_timeout,
        }
    }

    /// Charge retry policy derived from this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.payment_max_attempts,
            base_delay: self.payment_base_delay,
            multiplier: self.payment_backoff_multiplier,
            max_delay: self.payment_max_delay,
        }
    }

    /// Breaker tuning derived from this config.
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            window: self.breaker_window,
            cooldown: self.breaker_cooldown,
        }
    }

    /// Consumer redelivery policy derived from this config.
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            max_redeliveries: self.consumer_max_redeliveries,
            redelivery_delay: self.consumer_redelivery_delay,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            outbox_poll_interval: Duration::from_secs(5),
            outbox_batch_size: 10,
            outbox_claim_lease: Duration::from_secs(60),
            publish_timeout: Duration::from_secs(10),
            payment_max_attempts: 3,
            payment_base_delay: Duration::from_millis(500),
            payment_backoff_multiplier: 2.0,
            payment_max_delay: Duration::from_secs(10),
            breaker_failure_threshold: 5,
            breaker_window: Duration::from_secs(60),
            breaker_cooldown: Duration::from_secs(30),
            consumer_max_redeliveries: 5,
            consumer_redelivery_delay: Duration::from_millis(500),
            log_level: "info".to_string(),
        }
    }
}
