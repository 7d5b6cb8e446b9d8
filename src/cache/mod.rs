//! 增强prop状态缓存模块
//!
//! 为读多的服务路径提供版本化的prop预测/赔率缓存。
//!
//! ## 功能特性
//!
//! - 每key版本单调递增，并发写入按完成顺序解析
//! - TTL惰性过期 + 实时信号（天气、伤病、阵容、盘口移动）范围失效
//! - 有界的优先级预热队列与后台worker池
//! - 按年龄归一的LFU淘汰，失效条目优先
//! - 命中/未命中/淘汰/预热统计

pub mod entry;
pub mod eviction;
pub mod invalidation;
pub mod prop_cache;
pub mod stats;
pub mod store;
pub mod warming;

use std::sync::Arc;

pub use entry::{
    EntrySnapshot, InvalidationEvent, PropCacheEntry, PropState, SensitivityConfig, SignalClass,
    StateDistribution,
};
pub use prop_cache::PropStateCache;
pub use stats::{CapacityStats, MetricsSink, PerformanceStats, StatsSnapshot, WarmingStats};
pub use store::{CacheStore, EvictionCandidate, WarmTicket};
pub use warming::{PropRefresher, PushOutcome, WarmJob, WarmingQueue, WarmingScheduler};

use crate::config::CacheConfig;
use crate::error::Result;

/// 创建只读写、不预热的缓存实例
pub fn create_prop_cache<T: Clone + Send + Sync + 'static>() -> Result<PropStateCache<T>> {
    let mut config = CacheConfig::default();
    config.warming.enabled = false;
    PropStateCache::new(config, None, None)
}

/// 创建带预热管线的缓存实例
pub fn create_warming_cache<T: Clone + Send + Sync + 'static>(
    refresher: Arc<dyn PropRefresher<T>>,
) -> Result<PropStateCache<T>> {
    PropStateCache::new(CacheConfig::default(), Some(refresher), None)
}

/// 缓存构建器，用于灵活组装缓存实例
pub struct CacheBuilder<T> {
    /// 缓存配置
    config: CacheConfig,
    /// 刷新协作者（预热开启时必须提供）
    refresher: Option<Arc<dyn PropRefresher<T>>>,
    /// 可选指标接收器
    sink: Option<Arc<dyn MetricsSink>>,
}

impl<T: Clone + Send + Sync + 'static> CacheBuilder<T> {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            refresher: None,
            sink: None,
        }
    }

    /// 设置条目数上限
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.config.max_memory_entries = max_entries;
        self
    }

    /// 设置默认TTL（分钟）
    pub fn with_default_ttl_minutes(mut self, minutes: i64) -> Self {
        self.config.default_ttl_minutes = minutes;
        self
    }

    /// 启用或禁用预热
    pub fn with_warming(mut self, enabled: bool) -> Self {
        self.config.warming.enabled = enabled;
        self
    }

    /// 设置预热队列容量
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.warming.queue_capacity = capacity;
        self
    }

    /// 设置默认预热优先级
    pub fn with_default_priority(mut self, priority: u8) -> Self {
        self.config.warming.default_priority = priority;
        self
    }

    /// 设置单次刷新超时（秒）
    pub fn with_refresh_timeout_secs(mut self, secs: u64) -> Self {
        self.config.warming.refresh_timeout_secs = secs;
        self
    }

    /// 设置预热worker数
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.warming.workers = workers;
        self
    }

    /// 启用后台过期扫描
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.config.sweep_interval_secs = Some(secs);
        self
    }

    /// 设置刷新协作者
    pub fn with_refresher(mut self, refresher: Arc<dyn PropRefresher<T>>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// 设置指标接收器
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 构建缓存实例
    pub fn build(self) -> Result<PropStateCache<T>> {
        PropStateCache::new(self.config, self.refresher, self.sink)
    }
}

impl<T: Clone + Send + Sync + 'static> Default for CacheBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_builder() {
        let cache: PropStateCache<i32> = CacheBuilder::new()
            .with_max_entries(500)
            .with_default_ttl_minutes(15)
            .with_warming(false)
            .build()
            .unwrap();
        assert!(cache.is_empty().unwrap());

        let stats = cache.get_stats().unwrap();
        assert_eq!(stats.capacity.max_memory_entries, 500);
        assert_eq!(stats.warming.workers, 0);
    }

    #[test]
    fn test_builder_warming_requires_refresher() {
        let result: Result<PropStateCache<i32>> = CacheBuilder::new().build();
        assert!(result.is_err());
    }

    #[test]
    fn test_create_prop_cache_factory() {
        let cache: PropStateCache<String> = create_prop_cache().unwrap();
        cache.set("p1", "spread -3.5".to_string()).unwrap();
        let (data, _) = cache.get("p1").unwrap();
        assert_eq!(data.as_deref(), Some("spread -3.5"));
    }
}
