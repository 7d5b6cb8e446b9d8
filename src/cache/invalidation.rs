use std::sync::Arc;

use log::{info, warn};

use crate::error::Result;

use super::entry::SignalClass;
use super::stats::{MetricsSink, StatsCollector};
use super::store::CacheStore;

/// 失效引擎
///
/// 支持按key失效单个条目，或按信号类别对所有敏感条目
/// 做范围失效。失效只改变状态并清空payload，版本、时间戳
/// 与计数器全部保留，便于观测与预热利用条目历史。
pub struct InvalidationEngine<T> {
    /// 条目存储
    store: Arc<CacheStore<T>>,
    /// 统计收集器
    stats: Arc<StatsCollector>,
    /// 可选指标接收器
    sink: Option<Arc<dyn MetricsSink>>,
}

impl<T: Clone> InvalidationEngine<T> {
    /// 创建失效引擎
    pub fn new(
        store: Arc<CacheStore<T>>,
        stats: Arc<StatsCollector>,
        sink: Option<Arc<dyn MetricsSink>>,
    ) -> Self {
        Self { store, stats, sink }
    }

    /// 执行失效
    ///
    /// 给定`prop_id`时失效单个条目，返回0或1；
    /// 省略`prop_id`时把`reason`解释为信号类别名，
    /// 失效所有对该信号敏感的条目。未知信号名不命中任何
    /// 条目，返回0。
    pub fn invalidate(&self, prop_id: Option<&str>, reason: &str) -> Result<usize> {
        let count = match prop_id {
            Some(id) => {
                if self.store.invalidate_entry(id, reason)? {
                    if let Some(sink) = &self.sink {
                        sink.on_invalidation(id, reason);
                    }
                    1
                } else {
                    0
                }
            }
            None => self.invalidate_by_signal(reason)?,
        };

        if count > 0 {
            self.stats.record_invalidations(count as u64);
            info!("已失效 {} 个条目 ({})", count, reason);
        }
        Ok(count)
    }

    /// 按信号类别做范围失效
    fn invalidate_by_signal(&self, reason: &str) -> Result<usize> {
        let signal: SignalClass = match reason.parse() {
            Ok(signal) => signal,
            Err(()) => {
                warn!("未知的信号类别: {}", reason);
                return Ok(0);
            }
        };

        let count = self
            .store
            .invalidate_matching(|sensitivity| sensitivity.matches(signal), signal.as_str())?;
        if count > 0 {
            if let Some(sink) = &self.sink {
                sink.on_invalidation("*", signal.as_str());
            }
        }
        Ok(count)
    }
}
