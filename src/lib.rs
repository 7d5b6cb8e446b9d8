//! propcache - Versioned prop state cache
//!
//! In-process cache for sports prop prediction/odds payloads on a read-heavy
//! serving path. Freshness is governed by TTL *and* live-signal sensitivity
//! (weather, injury, lineup, line movement), stale entries are proactively
//! refreshed by a bounded background warming pipeline, and memory stays
//! bounded through age-normalized LFU eviction.
//!
//! # Features
//!
//! - Per-key monotonic versioning under concurrent writers
//! - Signal-class-scoped partial invalidation
//! - Priority warming queue with O(log n) decrease-key
//! - Lazy TTL detection with an optional background sweep
//! - Hit/miss/eviction/warming statistics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use propcache::{create_prop_cache, Result};
//!
//! fn main() -> Result<()> {
//!     let cache = create_prop_cache::<serde_json::Value>()?;
//!     cache.set("nba_pts_lebron_o25.5", serde_json::json!({"line": 25.5}))?;
//!     let (data, entry) = cache.get("nba_pts_lebron_o25.5")?;
//!     println!("{:?} ({:?})", data, entry.state);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod config;
pub mod error;

// Cache subsystem
pub mod cache;

pub use cache::{
    create_prop_cache, create_warming_cache, CacheBuilder, CapacityStats, EntrySnapshot,
    InvalidationEvent, MetricsSink, PerformanceStats, PropRefresher, PropState, PropStateCache,
    SensitivityConfig, SignalClass, StatsSnapshot, WarmingStats,
};
pub use config::{CacheConfig, WarmingConfig};
pub use error::{Error, Result};
