use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;

use crate::error::{Error, Result};

use super::entry::{
    EntrySnapshot, PropCacheEntry, PropState, SensitivityConfig, StateDistribution,
};

/// 预热凭据
///
/// worker开始预热时记录条目当时的版本与状态，
/// 刷新完成后据此判定版本竞争并决定提交或丢弃。
#[derive(Debug, Clone, Copy)]
pub struct WarmTicket {
    /// 开始预热时观察到的版本（0表示当时不存在）
    pub observed_version: u64,
    /// 进入Warming前的状态，失败时恢复
    pub prior_state: PropState,
}

/// 淘汰候选的元数据视图
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    /// prop标识
    pub prop_id: String,
    /// 当前状态
    pub state: PropState,
    /// 命中次数
    pub hit_count: u64,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

/// 键控条目存储
///
/// 所有`PropCacheEntry`由本结构独占持有，唯一的变更入口。
/// 全局RwLock只在定位、插入或移除槽位时短暂持有，
/// 条目本身的修改由每key一把的Mutex串行化，
/// 不同key之间的操作互不阻塞。
pub struct CacheStore<T> {
    /// key -> 条目槽位
    entries: RwLock<HashMap<String, Arc<Mutex<PropCacheEntry<T>>>>>,
}

impl<T: Clone> CacheStore<T> {
    /// 创建空的存储
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 规范化prop_id：空白串视为无效
    fn normalized(prop_id: &str) -> Option<&str> {
        let trimmed = prop_id.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    /// 当前条目数
    pub fn len(&self) -> Result<usize> {
        let map = self.entries.read().map_err(|e| Error::lock(e.to_string()))?;
        Ok(map.len())
    }

    /// 是否为空
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// 定位槽位；`create`为true时在缺失处插入占位条目
    fn slot(&self, prop_id: &str, create: bool) -> Result<Option<Arc<Mutex<PropCacheEntry<T>>>>> {
        {
            let map = self.entries.read().map_err(|e| Error::lock(e.to_string()))?;
            if let Some(slot) = map.get(prop_id) {
                return Ok(Some(slot.clone()));
            }
        }
        if !create {
            return Ok(None);
        }
        let mut map = self.entries.write().map_err(|e| Error::lock(e.to_string()))?;
        let slot = map
            .entry(prop_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PropCacheEntry::placeholder(prop_id))))
            .clone();
        Ok(Some(slot))
    }

    /// 发布新版本
    ///
    /// 版本号在每key锁内按完成顺序分配，并发写同一key时
    /// 后完成者胜出，单调性不会被破坏。空白prop_id是no-op，
    /// 返回Missing快照而非错误。
    pub fn set(
        &self,
        prop_id: &str,
        payload: T,
        ttl: Duration,
        sensitivity: Option<SensitivityConfig>,
    ) -> Result<EntrySnapshot> {
        let id = match Self::normalized(prop_id) {
            Some(id) => id,
            None => return Ok(EntrySnapshot::missing(prop_id)),
        };

        let slot = self
            .slot(id, true)?
            .ok_or_else(|| Error::internal("slot creation failed"))?;
        let mut entry = slot.lock().map_err(|e| Error::lock(e.to_string()))?;
        entry.apply_set(payload, ttl, Some(sensitivity.unwrap_or_default()));
        debug!("已缓存 {} (version {})", id, entry.version);
        Ok(entry.snapshot())
    }

    /// 读取最新条目
    ///
    /// 未命中、过期、已失效都是正常的控制流结果，
    /// 一律返回`(None, 快照)`而不是错误。过期在读取时
    /// 惰性检测并标记为Stale。
    pub fn get(&self, prop_id: &str) -> Result<(Option<T>, EntrySnapshot)> {
        let id = match Self::normalized(prop_id) {
            Some(id) => id,
            None => return Ok((None, EntrySnapshot::missing(prop_id))),
        };

        let slot = match self.slot(id, false)? {
            Some(slot) => slot,
            None => return Ok((None, EntrySnapshot::missing(id))),
        };

        let mut entry = slot.lock().map_err(|e| Error::lock(e.to_string()))?;
        if entry.version == 0 {
            // 占位条目：首次set尚未完成
            return Ok((None, EntrySnapshot::missing(id)));
        }

        let now = Utc::now();
        if entry.is_expired(now) {
            if entry.state == PropState::Fresh {
                entry.state = PropState::Stale;
                entry.updated_at = now;
            }
            return Ok((None, entry.snapshot()));
        }

        if entry.state == PropState::Invalidated || entry.payload.is_none() {
            return Ok((None, entry.snapshot()));
        }

        entry.mark_hit();
        Ok((entry.payload.clone(), entry.snapshot()))
    }

    /// 获取最新快照（不计入访问统计）
    pub fn peek(&self, prop_id: &str) -> Result<Option<EntrySnapshot>> {
        let id = match Self::normalized(prop_id) {
            Some(id) => id,
            None => return Ok(None),
        };
        let slot = match self.slot(id, false)? {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let entry = slot.lock().map_err(|e| Error::lock(e.to_string()))?;
        if entry.version == 0 {
            return Ok(None);
        }
        Ok(Some(entry.snapshot()))
    }

    /// 失效单个条目
    ///
    /// 已处于Invalidated的条目保持不变（幂等），返回false。
    pub fn invalidate_entry(&self, prop_id: &str, trigger: &str) -> Result<bool> {
        let id = match Self::normalized(prop_id) {
            Some(id) => id,
            None => return Ok(false),
        };
        let slot = match self.slot(id, false)? {
            Some(slot) => slot,
            None => return Ok(false),
        };
        let mut entry = slot.lock().map_err(|e| Error::lock(e.to_string()))?;
        if entry.version == 0 || entry.state == PropState::Invalidated {
            return Ok(false);
        }
        entry.apply_invalidation(trigger);
        Ok(true)
    }

    /// 按信号类别失效
    ///
    /// 遍历所有条目，仅对敏感度匹配的条目生效。
    pub fn invalidate_matching<F>(&self, predicate: F, trigger: &str) -> Result<usize>
    where
        F: Fn(&SensitivityConfig) -> bool,
    {
        let slots: Vec<Arc<Mutex<PropCacheEntry<T>>>> = {
            let map = self.entries.read().map_err(|e| Error::lock(e.to_string()))?;
            map.values().cloned().collect()
        };

        let mut count = 0;
        for slot in slots {
            let mut entry = slot.lock().map_err(|e| Error::lock(e.to_string()))?;
            if entry.version == 0 || entry.state == PropState::Invalidated {
                continue;
            }
            if predicate(&entry.sensitivity) {
                entry.apply_invalidation(trigger);
                count += 1;
            }
        }
        Ok(count)
    }

    /// 进入预热状态并返回凭据
    ///
    /// 条目不存在时不创建槽位，凭据记录version=0，
    /// 预热完成时若仍不存在则按首次写入处理。
    pub fn begin_warming(&self, prop_id: &str) -> Result<WarmTicket> {
        let id = match Self::normalized(prop_id) {
            Some(id) => id,
            None => {
                return Ok(WarmTicket {
                    observed_version: 0,
                    prior_state: PropState::Missing,
                })
            }
        };
        let slot = match self.slot(id, false)? {
            Some(slot) => slot,
            None => {
                return Ok(WarmTicket {
                    observed_version: 0,
                    prior_state: PropState::Missing,
                })
            }
        };
        let mut entry = slot.lock().map_err(|e| Error::lock(e.to_string()))?;
        if entry.version == 0 {
            return Ok(WarmTicket {
                observed_version: 0,
                prior_state: PropState::Missing,
            });
        }
        let prior = entry.state;
        entry.state = PropState::Warming;
        entry.updated_at = Utc::now();
        Ok(WarmTicket {
            observed_version: entry.version,
            prior_state: prior,
        })
    }

    /// 提交预热结果
    ///
    /// 若版本自凭据记录后已被直接`set`推进，刷新结果
    /// 在版本竞争中落败，直接丢弃并返回false。
    pub fn complete_warming(
        &self,
        prop_id: &str,
        ticket: WarmTicket,
        payload: T,
        ttl: Duration,
    ) -> Result<bool> {
        let id = match Self::normalized(prop_id) {
            Some(id) => id,
            None => return Ok(false),
        };

        if ticket.observed_version == 0 {
            // 开始预热时条目不存在：仅当现在仍不存在时写入
            if self.peek(id)?.is_some() {
                debug!("丢弃 {} 的预热结果：期间已有直接写入", id);
                return Ok(false);
            }
            self.set(id, payload, ttl, None)?;
            return Ok(true);
        }

        let slot = match self.slot(id, false)? {
            Some(slot) => slot,
            None => {
                // 条目已被淘汰，预热结果不再有归宿
                debug!("丢弃 {} 的预热结果：条目已被淘汰", id);
                return Ok(false);
            }
        };
        let mut entry = slot.lock().map_err(|e| Error::lock(e.to_string()))?;
        if entry.version != ticket.observed_version {
            debug!(
                "丢弃 {} 的预热结果：版本已从 {} 推进到 {}",
                id, ticket.observed_version, entry.version
            );
            return Ok(false);
        }
        // 保留原敏感度配置
        entry.apply_set(payload, ttl, None);
        Ok(true)
    }

    /// 记录预热失败
    ///
    /// 仅当条目仍处于本次预热（版本与状态都未变）时恢复
    /// 先前状态并记录失败原因，之前的有效版本保持可用。
    pub fn fail_warming(&self, prop_id: &str, ticket: WarmTicket, message: &str) -> Result<()> {
        let id = match Self::normalized(prop_id) {
            Some(id) => id,
            None => return Ok(()),
        };
        if ticket.observed_version == 0 {
            return Ok(());
        }
        let slot = match self.slot(id, false)? {
            Some(slot) => slot,
            None => return Ok(()),
        };
        let mut entry = slot.lock().map_err(|e| Error::lock(e.to_string()))?;
        if entry.version == ticket.observed_version && entry.state == PropState::Warming {
            entry.state = ticket.prior_state;
            entry.last_error = Some(message.to_string());
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    /// 收集淘汰候选的元数据
    pub fn eviction_candidates(&self) -> Result<Vec<EvictionCandidate>> {
        let slots: Vec<Arc<Mutex<PropCacheEntry<T>>>> = {
            let map = self.entries.read().map_err(|e| Error::lock(e.to_string()))?;
            map.values().cloned().collect()
        };

        let mut candidates = Vec::with_capacity(slots.len());
        for slot in slots {
            let entry = slot.lock().map_err(|e| Error::lock(e.to_string()))?;
            candidates.push(EvictionCandidate {
                prop_id: entry.prop_id.clone(),
                state: entry.state,
                hit_count: entry.hit_count,
                created_at: entry.created_at,
            });
        }
        Ok(candidates)
    }

    /// 移除一组条目，返回实际移除数
    pub fn remove_many(&self, prop_ids: &[String]) -> Result<usize> {
        let mut map = self.entries.write().map_err(|e| Error::lock(e.to_string()))?;
        let mut removed = 0;
        for id in prop_ids {
            if map.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// 将所有已过期的Fresh条目标记为Stale，返回标记数
    pub fn sweep_expired(&self) -> Result<usize> {
        let slots: Vec<Arc<Mutex<PropCacheEntry<T>>>> = {
            let map = self.entries.read().map_err(|e| Error::lock(e.to_string()))?;
            map.values().cloned().collect()
        };

        let now = Utc::now();
        let mut swept = 0;
        for slot in slots {
            let mut entry = slot.lock().map_err(|e| Error::lock(e.to_string()))?;
            if entry.state == PropState::Fresh && entry.is_expired(now) {
                entry.state = PropState::Stale;
                entry.updated_at = now;
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// 统计各状态条目数
    pub fn state_distribution(&self) -> Result<StateDistribution> {
        let slots: Vec<Arc<Mutex<PropCacheEntry<T>>>> = {
            let map = self.entries.read().map_err(|e| Error::lock(e.to_string()))?;
            map.values().cloned().collect()
        };

        let mut distribution = StateDistribution::new();
        for slot in slots {
            let entry = slot.lock().map_err(|e| Error::lock(e.to_string()))?;
            *distribution
                .entry(entry.state.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(distribution)
    }
}

impl<T: Clone> Default for CacheStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
