//! Pool configuration options

use std::time::Duration;

/// Configuration for expiring pool behavior
///
/// # Examples
///
/// ```
/// use expiring_pool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_default_ttl(Duration::from_secs(300))
///     .with_initial_capacity(64);
///
/// assert_eq!(config.default_ttl, Duration::from_secs(300));
/// assert_eq!(config.initial_capacity, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfiguration {
    /// Grace period applied when a [`PooledValue`](crate::PooledValue) guard is dropped
    pub default_ttl: Duration,

    /// Number of keys to reserve room for up front
    pub initial_capacity: usize,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            initial_capacity: 0,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the grace period used by guards on drop
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Pre-size the key map and eviction queue
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}
