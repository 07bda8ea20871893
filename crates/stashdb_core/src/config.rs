//! Store configuration.

use std::time::Duration;

/// Name of the database used when none is configured.
pub const DEFAULT_DATABASE_NAME: &str = "stashdb";

/// Configuration shared by a [`Db`](crate::Db) and its stores.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the physical database holding every collection.
    pub database_name: String,

    /// Retry policy for version conflicts.
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database name.
    #[must_use]
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// How operations react to version conflicts.
///
/// An operation runs once and is retried up to `max_retries` more times,
/// waiting `delay` before each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Fixed wait before each retry.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    /// Creates the default policy (3 retries, 100 ms apart).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Sets the number of retries.
    #[must_use]
    pub const fn max_retries(mut self, value: u32) -> Self {
        self.max_retries = value;
        self
    }

    /// Sets the wait before each retry.
    #[must_use]
    pub const fn delay(mut self, value: Duration) -> Self {
        self.delay = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.database_name, "stashdb");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.delay, Duration::from_millis(100));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .database_name("app")
            .retry(RetryConfig::new().max_retries(5).delay(Duration::from_millis(10)));

        assert_eq!(config.database_name, "app");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(RetryConfig::no_retry().max_retries, 0);
    }
}
