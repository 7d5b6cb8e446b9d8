use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::error::Result;

use super::entry::PropState;
use super::stats::{MetricsSink, StatsCollector};
use super::store::{CacheStore, EvictionCandidate};

/// 淘汰管理器
///
/// 在每次`set`之后同步触发，将条目数压回上限。
/// 策略：优先淘汰Invalidated条目；其余按
/// `hit_count / 存活秒数`（近似按年龄归一的LFU）升序淘汰，
/// 同分时先淘汰created_at最早的条目。
pub struct EvictionManager<T> {
    /// 条目存储
    store: Arc<CacheStore<T>>,
    /// 条目数上限
    max_entries: usize,
    /// 统计收集器
    stats: Arc<StatsCollector>,
    /// 可选指标接收器
    sink: Option<Arc<dyn MetricsSink>>,
}

impl<T: Clone> EvictionManager<T> {
    /// 创建淘汰管理器
    pub fn new(
        store: Arc<CacheStore<T>>,
        max_entries: usize,
        stats: Arc<StatsCollector>,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> Self {
        Self {
            store,
            max_entries,
            stats,
            sink,
        }
    }

    /// 条目数上限
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// 检查容量并按需淘汰，返回淘汰数
    ///
    /// 精确淘汰：每轮只移除超出上限的数量。与写入并发时
    /// 可能需要多轮收敛，轮数有上界保护。
    pub fn maybe_evict(&self) -> Result<usize> {
        let mut total_evicted = 0;
        // 与并发写入竞争时最多重试数轮
        for _ in 0..8 {
            let len = self.store.len()?;
            if len <= self.max_entries {
                break;
            }
            let excess = len - self.max_entries;

            let mut candidates = self.store.eviction_candidates()?;
            Self::rank(&mut candidates);

            let victims: Vec<String> = candidates
                .into_iter()
                .take(excess)
                .map(|c| c.prop_id)
                .collect();
            if victims.is_empty() {
                break;
            }

            let removed = self.store.remove_many(&victims)?;
            if removed == 0 {
                break;
            }
            total_evicted += removed;
            self.stats.record_evictions(removed as u64);
            if let Some(sink) = &self.sink {
                for id in &victims {
                    sink.on_eviction(id);
                }
            }
            debug!("容量超限，已淘汰 {} 个条目", removed);
        }
        Ok(total_evicted)
    }

    /// 按淘汰优先级排序：Invalidated在前，随后按分数与年龄
    fn rank(candidates: &mut [EvictionCandidate]) {
        let now = Utc::now();
        candidates.sort_by(|a, b| {
            let a_invalidated = a.state == PropState::Invalidated;
            let b_invalidated = b.state == PropState::Invalidated;
            b_invalidated
                .cmp(&a_invalidated)
                .then_with(|| {
                    let score_a = Self::score(a, now);
                    let score_b = Self::score(b, now);
                    score_a.partial_cmp(&score_b).unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
    }

    /// 条目价值分数：命中次数除以存活秒数
    fn score(candidate: &EvictionCandidate, now: chrono::DateTime<Utc>) -> f64 {
        let age_seconds = (now - candidate.created_at).num_seconds().max(1) as f64;
        candidate.hit_count as f64 / age_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(60);

    fn manager(max: usize) -> (EvictionManager<i32>, Arc<CacheStore<i32>>, Arc<StatsCollector>) {
        let store = Arc::new(CacheStore::new());
        let stats = Arc::new(StatsCollector::new());
        (
            EvictionManager::new(store.clone(), max, stats.clone(), None),
            store,
            stats,
        )
    }

    #[test]
    fn test_no_eviction_under_bound() {
        let (manager, store, _) = manager(5);
        store.set("p1", 1, TTL, None).unwrap();
        assert_eq!(manager.maybe_evict().unwrap(), 0);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_exact_eviction_count() {
        let (manager, store, stats) = manager(3);
        for i in 0..5 {
            store.set(&format!("p{}", i), i, TTL, None).unwrap();
            manager.maybe_evict().unwrap();
        }
        assert_eq!(store.len().unwrap(), 3);
        // 插入 3 + 2 个，恰好淘汰 2 个
        assert_eq!(stats.performance().evictions, 2);
    }

    #[test]
    fn test_invalidated_entries_evicted_first() {
        let (manager, store, _) = manager(2);
        store.set("keep_a", 1, TTL, None).unwrap();
        store.set("doomed", 2, TTL, None).unwrap();
        store.invalidate_entry("doomed", "manual").unwrap();
        // keep_a有命中记录，doomed已失效
        store.get("keep_a").unwrap();

        store.set("keep_b", 3, TTL, None).unwrap();
        manager.maybe_evict().unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert!(store.peek("doomed").unwrap().is_none());
        assert!(store.peek("keep_a").unwrap().is_some());
        assert!(store.peek("keep_b").unwrap().is_some());
    }

    #[test]
    fn test_lowest_score_evicted() {
        let (manager, store, _) = manager(2);
        store.set("hot", 1, TTL, None).unwrap();
        store.set("cold", 2, TTL, None).unwrap();
        // hot有大量命中，cold从未命中
        for _ in 0..10 {
            store.get("hot").unwrap();
        }

        store.set("new", 3, TTL, None).unwrap();
        manager.maybe_evict().unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert!(store.peek("cold").unwrap().is_none());
        assert!(store.peek("hot").unwrap().is_some());
    }
}
