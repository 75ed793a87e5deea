//! Configuration for a probe run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default Redis host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default socket connect/read timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1;

/// Maximum number of attempts for a store call, including the first one.
pub const MAX_TRIES: u32 = 5;

/// Base delay for exponential backoff between store attempts.
pub const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Exponential backoff policy for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each subsequent attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_TRIES,
            base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before the given attempt (1-based). The first attempt
    /// never waits.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Everything a probe run needs to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Redis logical database.
    pub db: i64,
    /// Name of the list key holding the queue.
    pub queue: String,
    /// Number of entries to inspect from the head of the queue.
    pub items: usize,
    /// Connect and per-command response timeout.
    pub timeout: Duration,
    /// How long to wait for worker replies on the control channel.
    pub reply_timeout: Duration,
    /// Retry policy for store calls.
    pub retry: RetryPolicy,
}

impl ProbeConfig {
    /// Creates a configuration for the given queue with defaults.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db: 0,
            queue: queue.into(),
            items: 1,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            reply_timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }

    /// Sets host and port.
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Sets the logical database.
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Sets the number of items to inspect.
    pub fn with_items(mut self, items: usize) -> Self {
        self.items = items;
        self
    }

    /// Sets the socket timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the control-channel reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Connection URL for the store.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProbeConfig::new("orders");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 6379);
        assert_eq!(config.items, 1);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.redis_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn test_builder() {
        let config = ProbeConfig::new("orders")
            .with_address("redis.internal", 6380)
            .with_db(2)
            .with_items(3);
        assert_eq!(config.redis_url(), "redis://redis.internal:6380/2");
        assert_eq!(config.items, 3);
    }

    #[test]
    fn test_backoff_delays_double() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for(5), Duration::from_millis(800));
    }
}
