use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 缓存条目状态
///
/// 状态迁移是单向的，仅预热成功（Warming → Fresh）
/// 与预热失败（Warming → 先前状态）例外。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropState {
    /// 缓存中不存在该prop
    Missing,
    /// 新近写入，TTL未过期
    Fresh,
    /// TTL已过期但尚未被显式失效
    Stale,
    /// 已被失效，payload不再可用
    Invalidated,
    /// 正在后台预热刷新
    Warming,
}

impl PropState {
    /// 返回状态名称（用于统计分布）
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Invalidated => "invalidated",
            Self::Warming => "warming",
        }
    }
}

/// 实时信号类别
///
/// 每个类别对应一个敏感度开关，用于范围失效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalClass {
    /// 天气变化
    Weather,
    /// 伤病报告
    Injury,
    /// 阵容变动
    Lineup,
    /// 盘口移动
    LineMovement,
}

impl SignalClass {
    /// 返回信号类别名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::Injury => "injury",
            Self::Lineup => "lineup",
            Self::LineMovement => "line_movement",
        }
    }
}

impl FromStr for SignalClass {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "weather" => Ok(Self::Weather),
            "injury" => Ok(Self::Injury),
            "lineup" => Ok(Self::Lineup),
            "line_movement" => Ok(Self::LineMovement),
            _ => Err(()),
        }
    }
}

/// 实时信号敏感度配置
///
/// 反序列化时缺省的字段等价于false。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityConfig {
    /// 对天气变化敏感
    pub weather: bool,
    /// 对伤病报告敏感
    pub injury: bool,
    /// 对阵容变动敏感
    pub lineup: bool,
    /// 对盘口移动敏感
    pub line_movement: bool,
}

impl SensitivityConfig {
    /// 检查是否对指定信号类别敏感
    pub fn matches(&self, signal: SignalClass) -> bool {
        match signal {
            SignalClass::Weather => self.weather,
            SignalClass::Injury => self.injury,
            SignalClass::Lineup => self.lineup,
            SignalClass::LineMovement => self.line_movement,
        }
    }

    /// 检查是否对任一信号类别敏感
    pub fn any(&self) -> bool {
        self.weather || self.injury || self.lineup || self.line_movement
    }
}

/// 失效事件记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// 触发原因（信号类别名或调用方提供的原因）
    pub trigger: String,
    /// 发生时间
    pub occurred_at: DateTime<Utc>,
}

/// 单个prop的版本化缓存条目
///
/// 由`CacheStore`独占持有，其他组件一律通过store的
/// 变更方法访问，不直接修改条目。
#[derive(Debug, Clone)]
pub struct PropCacheEntry<T> {
    /// prop标识
    pub prop_id: String,
    /// 缓存的payload（失效后清空）
    pub payload: Option<T>,
    /// 单key内单调递增的版本号（0表示尚未写入）
    pub version: u64,
    /// 当前状态
    pub state: PropState,
    /// 创建时间（首次set）
    pub created_at: DateTime<Utc>,
    /// 最后变更时间
    pub updated_at: DateTime<Utc>,
    /// 过期时间
    pub expires_at: DateTime<Utc>,
    /// 生命周期内访问次数
    pub access_count: u64,
    /// 生命周期内命中次数
    pub hit_count: u64,
    /// 实时信号敏感度
    pub sensitivity: SensitivityConfig,
    /// 失效事件历史
    pub invalidation_events: Vec<InvalidationEvent>,
    /// 最近一次预热刷新失败的原因
    pub last_error: Option<String>,
}

impl<T> PropCacheEntry<T> {
    /// 创建占位条目（version=0，尚未写入payload）
    pub fn placeholder(prop_id: &str) -> Self {
        let now = Utc::now();
        Self {
            prop_id: prop_id.to_string(),
            payload: None,
            version: 0,
            state: PropState::Missing,
            created_at: now,
            updated_at: now,
            expires_at: now,
            access_count: 0,
            hit_count: 0,
            sensitivity: SensitivityConfig::default(),
            invalidation_events: Vec::new(),
            last_error: None,
        }
    }

    /// 发布新版本payload
    ///
    /// 版本号递增，状态回到Fresh。`sensitivity`为None时
    /// 保留原有敏感度（预热刷新路径），否则整体替换。
    pub fn apply_set(&mut self, payload: T, ttl: Duration, sensitivity: Option<SensitivityConfig>) {
        let now = Utc::now();
        if self.version == 0 {
            self.created_at = now;
        }
        self.version += 1;
        self.payload = Some(payload);
        self.state = PropState::Fresh;
        self.updated_at = now;
        self.expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        if let Some(config) = sensitivity {
            self.sensitivity = config;
        }
        self.last_error = None;
    }

    /// 检查TTL是否已过期
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.version > 0 && now > self.expires_at
    }

    /// 标记为已失效：清空payload并追加事件，元数据全部保留
    pub fn apply_invalidation(&mut self, trigger: &str) {
        let now = Utc::now();
        self.state = PropState::Invalidated;
        self.payload = None;
        self.updated_at = now;
        self.invalidation_events.push(InvalidationEvent {
            trigger: trigger.to_string(),
            occurred_at: now,
        });
    }

    /// 记录一次命中访问
    pub fn mark_hit(&mut self) {
        self.access_count += 1;
        self.hit_count += 1;
    }

    /// 生成不含payload的元数据快照
    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            prop_id: self.prop_id.clone(),
            version: self.version,
            state: self.state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
            access_count: self.access_count,
            hit_count: self.hit_count,
            sensitivity: self.sensitivity,
            invalidation_events: self.invalidation_events.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// 条目元数据快照
///
/// `get`/`set`返回给调用方的只读视图，payload单独返回，
/// 避免随元数据重复克隆。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySnapshot {
    /// prop标识
    pub prop_id: String,
    /// 版本号
    pub version: u64,
    /// 状态
    pub state: PropState,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 最后变更时间
    pub updated_at: DateTime<Utc>,
    /// 过期时间
    pub expires_at: DateTime<Utc>,
    /// 访问次数
    pub access_count: u64,
    /// 命中次数
    pub hit_count: u64,
    /// 敏感度配置
    pub sensitivity: SensitivityConfig,
    /// 失效事件历史
    pub invalidation_events: Vec<InvalidationEvent>,
    /// 最近预热失败原因
    pub last_error: Option<String>,
}

impl EntrySnapshot {
    /// 生成Missing快照（未命中时返回）
    pub fn missing(prop_id: &str) -> Self {
        let now = Utc::now();
        Self {
            prop_id: prop_id.to_string(),
            version: 0,
            state: PropState::Missing,
            created_at: now,
            updated_at: now,
            expires_at: now,
            access_count: 0,
            hit_count: 0,
            sensitivity: SensitivityConfig::default(),
            invalidation_events: Vec::new(),
            last_error: None,
        }
    }
}

/// 状态分布统计（状态名 -> 条目数）
pub type StateDistribution = HashMap<String, usize>;
