use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration for the prop state cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries held in memory
    pub max_memory_entries: usize,

    /// Default TTL applied by `set` when the caller does not supply one (minutes)
    pub default_ttl_minutes: i64,

    /// Warming pipeline configuration
    pub warming: WarmingConfig,

    /// Optional background sweep interval for TTL expiry (seconds).
    /// `None` means expiry is detected lazily at read time only.
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_entries: 10_000,
            default_ttl_minutes: 30,
            warming: WarmingConfig::default(),
            sweep_interval_secs: None,
        }
    }
}

impl CacheConfig {
    /// Validate the configuration at construction time
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_entries == 0 {
            return Err(Error::config("max_memory_entries must be at least 1"));
        }
        if self.default_ttl_minutes <= 0 {
            return Err(Error::config("default_ttl_minutes must be positive"));
        }
        if self.warming.enabled {
            if self.warming.queue_capacity == 0 {
                return Err(Error::config("warming queue_capacity must be at least 1"));
            }
            if self.warming.workers == 0 {
                return Err(Error::config("warming workers must be at least 1"));
            }
        }
        Ok(())
    }
}

/// Configuration for the background warming pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmingConfig {
    /// Whether background warming is enabled
    pub enabled: bool,

    /// Maximum number of queued warming jobs
    pub queue_capacity: usize,

    /// Default priority for `warm` requests (lower is served first)
    pub default_priority: u8,

    /// Timeout applied to each refresh collaborator call (seconds)
    pub refresh_timeout_secs: u64,

    /// Number of background worker tasks
    pub workers: usize,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1_000,
            default_priority: 5,
            refresh_timeout_secs: 10,
            workers: 1,
        }
    }
}
