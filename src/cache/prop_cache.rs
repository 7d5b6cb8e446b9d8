use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use tokio::task::JoinHandle;

use crate::config::CacheConfig;
use crate::error::{Error, Result};

use super::entry::{EntrySnapshot, PropState, SensitivityConfig};
use super::eviction::EvictionManager;
use super::invalidation::InvalidationEngine;
use super::stats::{MetricsSink, StatsCollector, StatsSnapshot};
use super::store::CacheStore;
use super::warming::{PropRefresher, WarmingScheduler};

/// 增强prop状态缓存
///
/// 读多场景下的进程内缓存：条目按key版本化，新鲜度除TTL外
/// 还受实时信号（天气、伤病、阵容、盘口移动）敏感度约束，
/// 过期数据通过有界的后台预热管线主动刷新，读路径绝不被
/// 无关key阻塞。payload对缓存完全不透明。
///
/// 通过`CacheConfig`显式构造，测试可以创建相互隔离的实例，
/// 不依赖进程级单例。
pub struct PropStateCache<T> {
    /// 配置
    config: CacheConfig,
    /// 条目存储
    store: Arc<CacheStore<T>>,
    /// 统计收集器
    stats: Arc<StatsCollector>,
    /// 失效引擎
    invalidation: InvalidationEngine<T>,
    /// 淘汰管理器（与预热调度器共享）
    eviction: Arc<EvictionManager<T>>,
    /// 预热调度器（预热关闭时为None）
    warming: Option<Arc<WarmingScheduler<T>>>,
    /// 可选指标接收器
    sink: Option<Arc<dyn MetricsSink>>,
    /// 后台过期扫描任务句柄
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + 'static> PropStateCache<T> {
    /// 创建缓存实例
    ///
    /// 预热开启但未提供刷新协作者是唯一的致命配置错误，
    /// 在构造时一次性报出。
    pub fn new(
        config: CacheConfig,
        refresher: Option<Arc<dyn PropRefresher<T>>>,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> Result<Self> {
        config.validate()?;

        let store: Arc<CacheStore<T>> = Arc::new(CacheStore::new());
        let stats = Arc::new(StatsCollector::new());
        let eviction = Arc::new(EvictionManager::new(
            store.clone(),
            config.max_memory_entries,
            stats.clone(),
            sink.clone(),
        ));

        let warming = if config.warming.enabled {
            let refresher = refresher.ok_or_else(|| {
                Error::config("warming is enabled but no refresh collaborator was provided")
            })?;
            Some(Arc::new(WarmingScheduler::new(
                store.clone(),
                eviction.clone(),
                refresher,
                stats.clone(),
                sink.clone(),
                config.warming.queue_capacity,
                Duration::from_secs(config.warming.refresh_timeout_secs),
                Self::ttl_from_minutes(config.default_ttl_minutes),
                config.warming.workers,
            )))
        } else {
            None
        };

        let cache = Self {
            invalidation: InvalidationEngine::new(store.clone(), stats.clone(), sink.clone()),
            eviction,
            store,
            stats,
            warming,
            sink,
            config,
            sweeper: Mutex::new(None),
        };
        info!(
            "prop状态缓存已创建 (max_entries {}, default_ttl {}min)",
            cache.config.max_memory_entries, cache.config.default_ttl_minutes
        );
        Ok(cache)
    }

    /// 启动后台任务：预热worker池与可选的过期扫描
    ///
    /// 必须在tokio运行时内调用。未启动时`warm`仍可入队，
    /// 任务会在启动后被消费。
    pub fn start(&self) {
        if let Some(scheduler) = &self.warming {
            Arc::clone(scheduler).start();
        }
        if let Some(interval_secs) = self.config.sweep_interval_secs {
            let store = self.store.clone();
            let handle = tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
                loop {
                    ticker.tick().await;
                    match store.sweep_expired() {
                        Ok(swept) if swept > 0 => {
                            info!("后台扫描标记 {} 个过期条目为Stale", swept)
                        }
                        Ok(_) => {}
                        Err(e) => warn!("后台过期扫描出错: {}", e),
                    }
                }
            });
            if let Ok(mut sweeper) = self.sweeper.lock() {
                *sweeper = Some(handle);
            }
        }
    }

    /// 分钟TTL换算
    fn ttl_from_minutes(minutes: i64) -> Duration {
        Duration::from_secs((minutes.max(0) as u64) * 60)
    }

    /// 以默认TTL与全false敏感度发布新版本
    pub fn set(&self, prop_id: &str, data: T) -> Result<EntrySnapshot> {
        self.set_with(
            prop_id,
            data,
            self.config.default_ttl_minutes,
            SensitivityConfig::default(),
        )
    }

    /// 发布新版本
    ///
    /// 版本按key单调递增，写入后同步检查容量并按需淘汰。
    /// 空白prop_id是no-op，返回Missing快照。
    pub fn set_with(
        &self,
        prop_id: &str,
        data: T,
        ttl_minutes: i64,
        sensitivity: SensitivityConfig,
    ) -> Result<EntrySnapshot> {
        let ttl = if ttl_minutes > 0 {
            Self::ttl_from_minutes(ttl_minutes)
        } else {
            Self::ttl_from_minutes(self.config.default_ttl_minutes)
        };
        let snapshot = self.store.set(prop_id, data, ttl, Some(sensitivity))?;
        if snapshot.state != PropState::Missing {
            self.eviction.maybe_evict()?;
        }
        Ok(snapshot)
    }

    /// 读取最新条目
    ///
    /// 热读路径：未命中、过期、已失效都以状态而非错误返回，
    /// 由上层决定是否使用过期数据。
    pub fn get(&self, prop_id: &str) -> Result<(Option<T>, EntrySnapshot)> {
        let (data, snapshot) = self.store.get(prop_id)?;
        if data.is_some() {
            self.stats.record_hit();
            if let Some(sink) = &self.sink {
                sink.on_hit(prop_id);
            }
        } else {
            self.stats.record_miss();
            if let Some(sink) = &self.sink {
                sink.on_miss(prop_id);
            }
        }
        Ok((data, snapshot))
    }

    /// 失效条目
    ///
    /// 给定`prop_id`时失效单个条目；省略时把`reason`解释为
    /// 信号类别名，对所有敏感条目做范围失效。返回失效数。
    pub fn invalidate(&self, prop_id: Option<&str>, reason: &str) -> Result<usize> {
        self.invalidation.invalidate(prop_id, reason)
    }

    /// 以默认优先级请求预热
    pub fn warm(&self, prop_ids: &[String]) -> Result<usize> {
        self.warm_with(prop_ids, self.config.warming.default_priority)
    }

    /// 以指定优先级请求预热，返回实际排队数
    ///
    /// 仍然Fresh且未过期的条目会被跳过；队列满时报
    /// `Capacity`错误。
    pub fn warm_with(&self, prop_ids: &[String], priority: u8) -> Result<usize> {
        self.warm_inner(prop_ids, priority, false)
    }

    /// 强制预热：不跳过仍然Fresh的条目
    pub fn warm_force(&self, prop_ids: &[String], priority: u8) -> Result<usize> {
        self.warm_inner(prop_ids, priority, true)
    }

    fn warm_inner(&self, prop_ids: &[String], priority: u8, force: bool) -> Result<usize> {
        let scheduler = self
            .warming
            .as_ref()
            .ok_or_else(|| Error::config("warming is disabled for this cache instance"))?;

        let targets: Vec<String> = if force {
            prop_ids.to_vec()
        } else {
            let now = Utc::now();
            let mut targets = Vec::with_capacity(prop_ids.len());
            for prop_id in prop_ids {
                let still_fresh = self
                    .store
                    .peek(prop_id)?
                    .map(|s| s.state == PropState::Fresh && now <= s.expires_at)
                    .unwrap_or(false);
                if !still_fresh {
                    targets.push(prop_id.clone());
                }
            }
            targets
        };
        scheduler.enqueue(&targets, priority)
    }

    /// 生成统计快照
    pub fn get_stats(&self) -> Result<StatsSnapshot> {
        let (queue_depth, workers) = match &self.warming {
            Some(scheduler) => (scheduler.queue_depth()?, scheduler.worker_count()),
            None => (0, 0),
        };
        Ok(StatsSnapshot::build(
            self.stats.performance(),
            self.store.len()?,
            self.config.max_memory_entries,
            queue_depth,
            workers,
            self.store.state_distribution()?,
        ))
    }

    /// 手动扫描：把已过期的Fresh条目标记为Stale
    pub fn sweep_expired(&self) -> Result<usize> {
        self.store.sweep_expired()
    }

    /// 当前条目数
    pub fn len(&self) -> Result<usize> {
        self.store.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    /// 停机：停止预热worker与后台扫描
    pub async fn shutdown(&self) {
        let handle = self.sweeper.lock().ok().and_then(|mut s| s.take());
        if let Some(handle) = handle {
            handle.abort();
        }
        if let Some(scheduler) = &self.warming {
            scheduler.shutdown().await;
        }
    }
}
