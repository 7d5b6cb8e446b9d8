use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{Error, Result};

use super::eviction::EvictionManager;
use super::stats::{MetricsSink, StatsCollector};
use super::store::CacheStore;

/// 注入的刷新协作者
///
/// 由预测/数据接入服务提供，负责为单个prop计算新payload。
/// 允许失败或超时，worker会完整处理这两种情况。
#[async_trait]
pub trait PropRefresher<T>: Send + Sync {
    /// 刷新单个prop，返回新payload
    async fn refresh(&self, prop_id: &str) -> Result<T>;
}

/// 入队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// 新任务入队
    Queued,
    /// 已排队任务升级到更高优先级
    Upgraded,
    /// 重复请求且优先级不更高，no-op
    Duplicate,
}

/// 预热任务
#[derive(Debug, Clone)]
pub struct WarmJob {
    /// prop标识
    pub prop_id: String,
    /// 优先级（数值越小越先出队）
    pub priority: u8,
    /// 入队时间
    pub enqueued_at: DateTime<Utc>,
    /// 入队序号，同优先级时保持FIFO
    seq: u64,
}

/// 带索引的优先级队列
///
/// 二叉堆加key到堆位置的索引，decrease-key为O(log n)。
/// 同一prop重复入队时只保留更高优先级的一份；
/// 队列满时显式报容量错误而不是静默丢弃。
pub struct WarmingQueue {
    /// 二叉堆，(priority, seq)字典序最小者在堆顶
    heap: Vec<WarmJob>,
    /// prop_id -> 堆内位置
    index: HashMap<String, usize>,
    /// 队列容量
    capacity: usize,
    /// 单调递增的入队序号
    next_seq: u64,
}

impl WarmingQueue {
    /// 创建指定容量的队列
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Vec::new(),
            index: HashMap::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// 当前队列深度
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// 入队或升级已有任务
    pub fn push(&mut self, prop_id: &str, priority: u8) -> Result<PushOutcome> {
        if let Some(&pos) = self.index.get(prop_id) {
            if priority < self.heap[pos].priority {
                // decrease-key：就地升级并上浮
                self.heap[pos].priority = priority;
                self.sift_up(pos);
                return Ok(PushOutcome::Upgraded);
            }
            return Ok(PushOutcome::Duplicate);
        }

        if self.heap.len() >= self.capacity {
            return Err(Error::capacity(format!(
                "warming queue full (capacity {})",
                self.capacity
            )));
        }

        let job = WarmJob {
            prop_id: prop_id.to_string(),
            priority,
            enqueued_at: Utc::now(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.heap.push(job);
        let pos = self.heap.len() - 1;
        self.index.insert(prop_id.to_string(), pos);
        self.sift_up(pos);
        Ok(PushOutcome::Queued)
    }

    /// 弹出优先级最高的任务
    pub fn pop(&mut self) -> Option<WarmJob> {
        let last = self.heap.len().checked_sub(1)?;
        self.swap(0, last);
        let job = self.heap.pop()?;
        self.index.remove(&job.prop_id);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(job)
    }

    /// 堆序比较：(priority, seq)字典序
    fn less(&self, a: usize, b: usize) -> bool {
        (self.heap[a].priority, self.heap[a].seq) < (self.heap[b].priority, self.heap[b].seq)
    }

    /// 交换堆元素并同步索引
    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].prop_id.clone(), a);
        self.index.insert(self.heap[b].prop_id.clone(), b);
    }

    /// 上浮
    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.less(pos, parent) {
                self.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    /// 下沉
    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let left = pos * 2 + 1;
            let right = pos * 2 + 2;
            let mut smallest = pos;
            if left < self.heap.len() && self.less(left, smallest) {
                smallest = left;
            }
            if right < self.heap.len() && self.less(right, smallest) {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }
}

/// 预热调度器
///
/// 优先级队列加后台worker池。worker出队后把条目转入
/// Warming状态，带超时调用注入的刷新协作者，成功结果
/// 经由store的版本守卫提交，失败则恢复先前状态并记录
/// `last_error`，不做自动重试。队列有自己的锁，与条目
/// 锁彼此独立，预热活动不会串行化读写路径。
pub struct WarmingScheduler<T> {
    /// 优先级队列
    queue: Mutex<WarmingQueue>,
    /// worker唤醒信号
    notify: Notify,
    /// 停机标志
    shutdown: AtomicBool,
    /// 条目存储
    store: Arc<CacheStore<T>>,
    /// 淘汰管理器：预热写入同样受条目数上限约束
    eviction: Arc<EvictionManager<T>>,
    /// 注入的刷新协作者
    refresher: Arc<dyn PropRefresher<T>>,
    /// 统计收集器
    stats: Arc<StatsCollector>,
    /// 可选指标接收器
    sink: Option<Arc<dyn MetricsSink>>,
    /// 单次刷新超时
    refresh_timeout: Duration,
    /// 预热写入使用的TTL
    default_ttl: Duration,
    /// worker数
    workers: usize,
    /// worker任务句柄
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + 'static> WarmingScheduler<T> {
    /// 创建预热调度器
    pub fn new(
        store: Arc<CacheStore<T>>,
        eviction: Arc<EvictionManager<T>>,
        refresher: Arc<dyn PropRefresher<T>>,
        stats: Arc<StatsCollector>,
        sink: Option<Arc<dyn MetricsSink>>,
        queue_capacity: usize,
        refresh_timeout: Duration,
        default_ttl: Duration,
        workers: usize,
    ) -> Self {
        Self {
            queue: Mutex::new(WarmingQueue::new(queue_capacity)),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            store,
            eviction,
            refresher,
            stats,
            sink,
            refresh_timeout,
            default_ttl,
            workers,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// worker数
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// 当前队列深度
    pub fn queue_depth(&self) -> Result<usize> {
        let queue = self.queue.lock().map_err(|e| Error::lock(e.to_string()))?;
        Ok(queue.len())
    }

    /// 批量入队，返回实际排队数
    ///
    /// 队列满时对调用方显式报`Capacity`错误。
    pub fn enqueue(&self, prop_ids: &[String], priority: u8) -> Result<usize> {
        let mut queued = 0;
        let mut capacity_error = None;
        {
            let mut queue = self.queue.lock().map_err(|e| Error::lock(e.to_string()))?;
            for prop_id in prop_ids {
                let trimmed = prop_id.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match queue.push(trimmed, priority) {
                    Ok(PushOutcome::Queued) | Ok(PushOutcome::Upgraded) => queued += 1,
                    Ok(PushOutcome::Duplicate) => {}
                    Err(e) => {
                        capacity_error = Some(e);
                        break;
                    }
                }
            }
        }
        // 队列满之前已入队的任务仍然有效，需要唤醒worker
        if queued > 0 {
            self.stats.record_warm_queued(queued as u64);
            for _ in 0..queued {
                self.notify.notify_one();
            }
        }
        match capacity_error {
            Some(e) => Err(e),
            None => Ok(queued),
        }
    }

    /// 启动后台worker池
    pub fn start(self: Arc<Self>) {
        let mut handles = match self.handles.lock() {
            Ok(handles) => handles,
            Err(e) => {
                warn!("无法启动预热worker: {}", e);
                return;
            }
        };
        for worker_id in 0..self.workers {
            let scheduler = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                scheduler.worker_loop(worker_id).await;
            }));
        }
    }

    /// worker主循环：出队即处理，队列空时等待唤醒
    async fn worker_loop(&self, worker_id: usize) {
        debug!("预热worker {} 启动", worker_id);
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let job = match self.queue.lock() {
                Ok(mut queue) => queue.pop(),
                Err(e) => {
                    warn!("预热队列锁异常: {}", e);
                    break;
                }
            };
            match job {
                Some(job) => self.process(job).await,
                None => self.notify.notified().await,
            }
        }
        // 把停机唤醒传递给下一个等待中的worker
        self.notify.notify_one();
        debug!("预热worker {} 退出", worker_id);
    }

    /// 处理单个预热任务
    async fn process(&self, job: WarmJob) {
        let prop_id = job.prop_id.as_str();
        let ticket = match self.store.begin_warming(prop_id) {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!("无法进入预热状态 {}: {}", prop_id, e);
                return;
            }
        };

        match timeout(self.refresh_timeout, self.refresher.refresh(prop_id)).await {
            Ok(Ok(payload)) => {
                match self
                    .store
                    .complete_warming(prop_id, ticket, payload, self.default_ttl)
                {
                    Ok(true) => {
                        // 预热可能新建条目，同样要压回容量上限
                        if let Err(e) = self.eviction.maybe_evict() {
                            warn!("预热后容量检查出错: {}", e);
                        }
                        self.stats.record_warm_completed();
                        if let Some(sink) = &self.sink {
                            sink.on_warm_complete(prop_id, true);
                        }
                        debug!("预热完成 {} (priority {})", prop_id, job.priority);
                    }
                    Ok(false) => {
                        // 版本竞争落败，结果已丢弃
                        debug!("预热结果被丢弃 {}", prop_id);
                    }
                    Err(e) => warn!("提交预热结果失败 {}: {}", prop_id, e),
                }
            }
            Ok(Err(e)) => self.record_failure(prop_id, ticket, &e.to_string()),
            Err(_) => {
                let message = format!(
                    "refresh timed out after {}s",
                    self.refresh_timeout.as_secs()
                );
                self.record_failure(prop_id, ticket, &message);
            }
        }
    }

    /// 记录刷新失败：恢复先前状态，留待下一次显式warm
    fn record_failure(&self, prop_id: &str, ticket: super::store::WarmTicket, message: &str) {
        warn!("预热失败 {}: {}", prop_id, message);
        if let Err(e) = self.store.fail_warming(prop_id, ticket, message) {
            warn!("记录预热失败状态时出错 {}: {}", prop_id, e);
        }
        self.stats.record_warm_failed();
        if let Some(sink) = &self.sink {
            sink.on_warm_complete(prop_id, false);
        }
    }

    /// 停机：唤醒所有worker并等待退出
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::PropState;
    use std::sync::atomic::AtomicU64;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_queue_priority_order() {
        let mut queue = WarmingQueue::new(10);
        queue.push("a", 5).unwrap();
        queue.push("b", 5).unwrap();
        queue.push("c", 1).unwrap();

        assert_eq!(queue.pop().unwrap().prop_id, "c");
        // 同优先级保持FIFO
        assert_eq!(queue.pop().unwrap().prop_id, "a");
        assert_eq!(queue.pop().unwrap().prop_id, "b");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_queue_priority_upgrade() {
        let mut queue = WarmingQueue::new(10);
        queue.push("a", 5).unwrap();
        queue.push("b", 5).unwrap();
        queue.push("c", 5).unwrap();

        // "a"升级到最高优先级，先于"b"/"c"出队
        assert_eq!(queue.push("a", 0).unwrap(), PushOutcome::Upgraded);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().prop_id, "a");
    }

    #[test]
    fn test_queue_duplicate_noop() {
        let mut queue = WarmingQueue::new(10);
        queue.push("a", 2).unwrap();
        // 相同或更差的优先级是no-op
        assert_eq!(queue.push("a", 2).unwrap(), PushOutcome::Duplicate);
        assert_eq!(queue.push("a", 7).unwrap(), PushOutcome::Duplicate);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().priority, 2);
    }

    #[test]
    fn test_queue_capacity_error() {
        let mut queue = WarmingQueue::new(2);
        queue.push("a", 5).unwrap();
        queue.push("b", 5).unwrap();
        let err = queue.push("c", 5).unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
        // 已排队任务的升级不受容量限制
        assert_eq!(queue.push("a", 0).unwrap(), PushOutcome::Upgraded);
    }

    #[test]
    fn test_queue_index_consistent_after_mixed_ops() {
        let mut queue = WarmingQueue::new(100);
        for i in 0..20 {
            queue.push(&format!("p{}", i), (20 - i) as u8).unwrap();
        }
        queue.push("p5", 0).unwrap();
        queue.push("p0", 1).unwrap();

        let mut last = (0u8, 0u64);
        let mut seen = std::collections::HashSet::new();
        while let Some(job) = queue.pop() {
            assert!((job.priority, job.seq) >= last);
            last = (job.priority, job.seq);
            assert!(seen.insert(job.prop_id));
        }
        assert_eq!(seen.len(), 20);
    }

    struct StubRefresher {
        calls: AtomicU64,
    }

    #[async_trait]
    impl PropRefresher<i32> for StubRefresher {
        async fn refresh(&self, _prop_id: &str) -> Result<i32> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(99)
        }
    }

    struct FailingRefresher;

    #[async_trait]
    impl PropRefresher<i32> for FailingRefresher {
        async fn refresh(&self, prop_id: &str) -> Result<i32> {
            Err(Error::refresh(format!("no upstream data for {}", prop_id)))
        }
    }

    struct SlowRefresher;

    #[async_trait]
    impl PropRefresher<i32> for SlowRefresher {
        async fn refresh(&self, _prop_id: &str) -> Result<i32> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(0)
        }
    }

    fn scheduler_with(
        refresher: Arc<dyn PropRefresher<i32>>,
        store: Arc<CacheStore<i32>>,
        timeout: Duration,
    ) -> Arc<WarmingScheduler<i32>> {
        scheduler_bounded(refresher, store, timeout, 100)
    }

    fn scheduler_bounded(
        refresher: Arc<dyn PropRefresher<i32>>,
        store: Arc<CacheStore<i32>>,
        timeout: Duration,
        max_entries: usize,
    ) -> Arc<WarmingScheduler<i32>> {
        let stats = Arc::new(StatsCollector::new());
        let eviction = Arc::new(EvictionManager::new(
            store.clone(),
            max_entries,
            stats.clone(),
            None,
        ));
        Arc::new(WarmingScheduler::new(
            store,
            eviction,
            refresher,
            stats,
            None,
            100,
            timeout,
            TTL,
            1,
        ))
    }

    /// 轮询等待条件成立
    async fn wait_until<F: Fn() -> bool>(predicate: F) -> bool {
        for _ in 0..200 {
            if predicate() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_worker_refreshes_entry() {
        let store: Arc<CacheStore<i32>> = Arc::new(CacheStore::new());
        store.set("p1", 1, Duration::from_secs(0), None).unwrap();
        let refresher = Arc::new(StubRefresher {
            calls: AtomicU64::new(0),
        });
        let scheduler = scheduler_with(refresher.clone(), store.clone(), Duration::from_secs(5));
        Arc::clone(&scheduler).start();

        scheduler.enqueue(&["p1".to_string()], 0).unwrap();

        let refreshed = wait_until(|| {
            store
                .peek("p1")
                .unwrap()
                .map(|s| s.version == 2 && s.state == PropState::Fresh)
                .unwrap_or(false)
        })
        .await;
        assert!(refreshed, "worker should refresh the entry");
        assert_eq!(refresher.calls.load(Ordering::Relaxed), 1);

        let (data, _) = store.get("p1").unwrap();
        assert_eq!(data, Some(99));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_records_last_error() {
        let store: Arc<CacheStore<i32>> = Arc::new(CacheStore::new());
        store.set("p1", 1, TTL, None).unwrap();
        let scheduler =
            scheduler_with(Arc::new(FailingRefresher), store.clone(), Duration::from_secs(5));
        Arc::clone(&scheduler).start();

        scheduler.enqueue(&["p1".to_string()], 0).unwrap();

        let failed = wait_until(|| {
            store
                .peek("p1")
                .unwrap()
                .map(|s| s.last_error.is_some())
                .unwrap_or(false)
        })
        .await;
        assert!(failed, "failure should be recorded on the entry");

        // 先前的有效版本保持可用，不做自动重试
        let (data, entry) = store.get("p1").unwrap();
        assert_eq!(data, Some(1));
        assert_eq!(entry.state, PropState::Fresh);
        assert_eq!(entry.version, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_timeout_treated_as_failure() {
        let store: Arc<CacheStore<i32>> = Arc::new(CacheStore::new());
        store.set("p1", 1, TTL, None).unwrap();
        let scheduler =
            scheduler_with(Arc::new(SlowRefresher), store.clone(), Duration::from_millis(50));
        Arc::clone(&scheduler).start();

        scheduler.enqueue(&["p1".to_string()], 0).unwrap();

        let failed = wait_until(|| {
            store
                .peek("p1")
                .unwrap()
                .map(|s| s.last_error.is_some())
                .unwrap_or(false)
        })
        .await;
        assert!(failed, "timeout should be recorded as failure");
        let snapshot = store.peek("p1").unwrap().unwrap();
        assert!(snapshot.last_error.unwrap().contains("timed out"));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_warming_inserts_respect_entry_bound() {
        let store: Arc<CacheStore<i32>> = Arc::new(CacheStore::new());
        let refresher = Arc::new(StubRefresher {
            calls: AtomicU64::new(0),
        });
        let scheduler =
            scheduler_bounded(refresher.clone(), store.clone(), Duration::from_secs(5), 2);
        Arc::clone(&scheduler).start();

        let ids: Vec<String> = (0..5).map(|i| format!("p{}", i)).collect();
        scheduler.enqueue(&ids, 0).unwrap();

        let drained = wait_until(|| refresher.calls.load(Ordering::Relaxed) == 5).await;
        assert!(drained, "all jobs should be processed");

        // 新建条目经由预热写入时条目数上限依然成立
        let bounded = wait_until(|| store.len().unwrap() <= 2).await;
        assert!(bounded, "store should be pushed back under the bound");
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers() {
        let store: Arc<CacheStore<i32>> = Arc::new(CacheStore::new());
        let refresher = Arc::new(StubRefresher {
            calls: AtomicU64::new(0),
        });
        let scheduler = scheduler_with(refresher, store, Duration::from_secs(5));
        Arc::clone(&scheduler).start();
        // 立即停机不应悬挂
        scheduler.shutdown().await;
    }
}
