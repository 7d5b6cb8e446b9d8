use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::StateDistribution;

/// 外部指标接收器
///
/// 由外层观测体系注入的可选协作者，所有回调默认no-op。
/// 回调在持有条目锁之外调用，实现方不应阻塞。
pub trait MetricsSink: Send + Sync {
    /// 缓存命中
    fn on_hit(&self, _prop_id: &str) {}
    /// 缓存未命中（含过期与已失效）
    fn on_miss(&self, _prop_id: &str) {}
    /// 条目被淘汰
    fn on_eviction(&self, _prop_id: &str) {}
    /// 条目被失效
    fn on_invalidation(&self, _prop_id: &str, _trigger: &str) {}
    /// 预热刷新完成
    fn on_warm_complete(&self, _prop_id: &str, _success: bool) {}
}

/// 统计计数器
///
/// 全部为进程生命周期内单调递增的原子计数，没有重置接口。
#[derive(Debug, Default)]
pub struct StatsCollector {
    /// 命中次数
    hits: AtomicU64,
    /// 未命中次数
    misses: AtomicU64,
    /// 淘汰次数
    evictions: AtomicU64,
    /// 失效条目数
    invalidations: AtomicU64,
    /// 进入预热队列的请求数
    warm_queued: AtomicU64,
    /// 预热成功次数
    warm_completed: AtomicU64,
    /// 预热失败次数
    warm_failed: AtomicU64,
}

impl StatsCollector {
    /// 创建新的统计收集器
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录命中
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录未命中
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录淘汰
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// 记录失效
    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    /// 记录预热入队
    pub fn record_warm_queued(&self, count: u64) {
        self.warm_queued.fetch_add(count, Ordering::Relaxed);
    }

    /// 记录预热成功
    pub fn record_warm_completed(&self) {
        self.warm_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录预热失败
    pub fn record_warm_failed(&self) {
        self.warm_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// 生成性能统计
    pub fn performance(&self) -> PerformanceStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        // 分母为0时命中率取0，避免除零
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };
        PerformanceStats {
            hits,
            misses,
            hit_rate,
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            warm_queued: self.warm_queued.load(Ordering::Relaxed),
            warm_completed: self.warm_completed.load(Ordering::Relaxed),
            warm_failed: self.warm_failed.load(Ordering::Relaxed),
        }
    }
}

/// 性能统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// 命中次数
    pub hits: u64,
    /// 未命中次数
    pub misses: u64,
    /// 命中率
    pub hit_rate: f64,
    /// 淘汰次数
    pub evictions: u64,
    /// 失效条目数
    pub invalidations: u64,
    /// 预热入队数
    pub warm_queued: u64,
    /// 预热成功数
    pub warm_completed: u64,
    /// 预热失败数
    pub warm_failed: u64,
}

/// 容量统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityStats {
    /// 当前条目数
    pub memory_entries: usize,
    /// 条目数上限
    pub max_memory_entries: usize,
    /// 利用率（百分比）
    pub utilization_pct: f64,
}

/// 预热管线统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmingStats {
    /// 当前队列深度
    pub queue_depth: usize,
    /// 后台worker数
    pub workers: usize,
}

/// 完整统计快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// 性能统计
    pub performance: PerformanceStats,
    /// 容量统计
    pub capacity: CapacityStats,
    /// 预热统计
    pub warming: WarmingStats,
    /// 状态分布（状态名 -> 条目数）
    pub states: StateDistribution,
    /// 快照生成时间
    pub captured_at: DateTime<Utc>,
}

impl StatsSnapshot {
    /// 组装完整快照
    pub fn build(
        performance: PerformanceStats,
        memory_entries: usize,
        max_memory_entries: usize,
        queue_depth: usize,
        workers: usize,
        states: StateDistribution,
    ) -> Self {
        let utilization_pct = if max_memory_entries > 0 {
            memory_entries as f64 / max_memory_entries as f64 * 100.0
        } else {
            0.0
        };
        Self {
            performance,
            capacity: CapacityStats {
                memory_entries,
                max_memory_entries,
                utilization_pct,
            },
            warming: WarmingStats {
                queue_depth,
                workers,
            },
            states,
            captured_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = StatsCollector::new();
        for _ in 0..10 {
            stats.record_hit();
        }
        for _ in 0..5 {
            stats.record_miss();
        }
        let perf = stats.performance();
        assert_eq!(perf.hits, 10);
        assert_eq!(perf.misses, 5);
        assert!((perf.hit_rate - 10.0 / 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_hit_rate_zero_denominator() {
        let stats = StatsCollector::new();
        // 无任何请求时命中率为0，不发生除零
        assert_eq!(stats.performance().hit_rate, 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = StatsCollector::new();
        stats.record_hit();
        let snapshot = StatsSnapshot::build(
            stats.performance(),
            3,
            10,
            2,
            1,
            StateDistribution::new(),
        );
        assert_eq!(snapshot.capacity.utilization_pct, 30.0);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"hit_rate\""));
        assert!(json.contains("\"queue_depth\":2"));
    }
}
