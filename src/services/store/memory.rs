use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{CoordinationStore, ttl_seconds};
use super::error::StoreError;
use super::types::{
    EventKind, KeyValue, LeaseId, TxnOp, TxnResponse, WatchEvent, WatchResponse, WatchStream,
};

#[derive(Debug)]
struct Entry {
    value: Bytes,
    lease: Option<LeaseId>,
    create_revision: i64,
    mod_revision: i64,
}

#[derive(Debug)]
struct Lease {
    ttl: Duration,
    deadline: Instant,
    keys: HashSet<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    entries: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    revision: i64,
    next_lease_id: LeaseId,
}

impl StoreState {
    // 删除所有已过期租约及其绑定的键，整体作为一次提交
    fn expire_leases(&mut self, now: Instant) -> Vec<WatchEvent> {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        if expired.is_empty() {
            return Vec::new();
        }

        let revision = self.revision + 1;
        let mut events = Vec::new();
        for id in expired {
            let Some(lease) = self.leases.remove(&id) else {
                continue;
            };

            let mut keys: Vec<String> = lease.keys.into_iter().collect();
            keys.sort();
            for key in keys {
                if let Some(event) = self.remove_entry(&key, revision) {
                    events.push(event);
                }
            }

            tracing::debug!(lease_id = id, "Lease expired");
        }

        if !events.is_empty() {
            self.revision = revision;
        }
        events
    }

    fn ensure_lease(&self, lease: Option<LeaseId>) -> Result<(), StoreError> {
        match lease {
            Some(id) if !self.leases.contains_key(&id) => Err(StoreError::LeaseNotFound(id)),
            _ => Ok(()),
        }
    }

    fn apply_put(
        &mut self,
        key: String,
        value: Bytes,
        lease: Option<LeaseId>,
        revision: i64,
    ) -> WatchEvent {
        let previous = self.entries.get(&key).map(|e| (e.create_revision, e.lease));

        // 键换绑租约时从旧租约中摘除
        if let Some((_, Some(old))) = previous
            && Some(old) != lease
            && let Some(old_lease) = self.leases.get_mut(&old)
        {
            old_lease.keys.remove(&key);
        }
        if let Some(id) = lease
            && let Some(new_lease) = self.leases.get_mut(&id)
        {
            new_lease.keys.insert(key.clone());
        }

        let (kind, create_revision) = match previous {
            Some((created, _)) => (EventKind::Modified, created),
            None => (EventKind::Created, revision),
        };

        self.entries.insert(
            key.clone(),
            Entry {
                value: value.clone(),
                lease,
                create_revision,
                mod_revision: revision,
            },
        );

        WatchEvent {
            kind,
            key,
            value: Some(value),
            revision,
        }
    }

    fn remove_entry(&mut self, key: &str, revision: i64) -> Option<WatchEvent> {
        let entry = self.entries.remove(key)?;
        if let Some(id) = entry.lease
            && let Some(lease) = self.leases.get_mut(&id)
        {
            lease.keys.remove(key);
        }

        Some(WatchEvent {
            kind: EventKind::Deleted,
            key: key.to_string(),
            value: None,
            revision,
        })
    }
}

#[derive(Debug)]
struct Watcher {
    prefix: String,
    sender: mpsc::UnboundedSender<WatchResponse>,
}

// 监听流被丢弃时注销对应的监听者
#[derive(Debug)]
struct WatcherGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        if self.inner.watchers.remove(&self.id).is_some() {
            tracing::debug!(watcher_id = self.id, "Closed watch");
        }
    }
}

struct GuardedWatchStream {
    stream: WatchStream,
    _guard: WatcherGuard,
}

impl Stream for GuardedWatchStream {
    type Item = WatchResponse;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<StoreState>,
    watchers: DashMap<u64, Watcher>,
    next_watcher_id: AtomicU64,
    unavailable: AtomicBool,
    reject_transactions: AtomicBool,
    closed: AtomicBool,
    task_tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// 进程内协调存储
///
/// 提供与分布式协调存储相同的语义：TTL 租约、原子事务、按修订号递增的前缀监听。
/// 所有写操作在同一把锁内完成，变更在持锁期间投递给监听者，因此同一个键的事件
/// 顺序与提交顺序一致。租约过期在每次操作前惰性执行，也可以通过
/// [`MemoryStore::start_lease_reaper`] 定期执行。
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可用（连接断开）
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
        tracing::debug!(available, "Memory store availability changed");
    }

    /// 让后续事务返回 `succeeded = false`
    pub fn set_reject_transactions(&self, reject: bool) {
        self.inner.reject_transactions.store(reject, Ordering::SeqCst);
    }

    /// 当前修订号
    pub fn revision(&self) -> i64 {
        self.inner.state.lock().map(|s| s.revision).unwrap_or_default()
    }

    /// 活跃的监听数量
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    /// 启动定期清理过期租约的后台任务，`shutdown` 时停止
    pub fn start_lease_reaper(&self, interval: Duration) {
        let store = self.clone();
        let shutdown = self.inner.shutdown.clone();

        self.inner.task_tracker.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match store.reap_expired() {
                            Ok(0) => {}
                            Ok(expired_keys) => {
                                tracing::debug!(expired_keys, "Lease reaper removed expired keys");
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "Lease reaper skipped a tick");
                            }
                        }
                    }
                }
            }
        });
    }

    /// 立即清理过期租约，返回删除的键数量
    pub fn reap_expired(&self) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let events = state.expire_leases(Instant::now());
        let revision = state.revision;
        self.publish(revision, &events);
        Ok(events.len())
    }

    /// 关闭存储：拒绝后续操作、结束所有监听流并等待后台任务退出
    pub async fn shutdown(&self) {
        {
            // 与 open_watch 互斥，关闭后不会再有新的监听者加入
            let _state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.closed.store(true, Ordering::SeqCst);
            self.inner.watchers.clear();
        }
        self.inner.shutdown.cancel();
        self.inner.task_tracker.close();
        self.inner.task_tracker.wait().await;
        tracing::info!("Memory store shut down");
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    // 持锁后再检查状态，避免与 shutdown 交错
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        let state = self
            .inner
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("store state lock poisoned".to_string()))?;
        self.check_available()?;
        Ok(state)
    }

    // 加锁并先处理过期租约
    fn lock_and_expire(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        let mut state = self.lock()?;
        let events = state.expire_leases(Instant::now());
        let revision = state.revision;
        self.publish(revision, &events);
        Ok(state)
    }

    // 必须在持有状态锁时调用
    fn publish(&self, revision: i64, events: &[WatchEvent]) {
        if events.is_empty() {
            return;
        }

        let mut closed = Vec::new();
        for entry in self.inner.watchers.iter() {
            let watcher = entry.value();
            let matched: Vec<WatchEvent> = events
                .iter()
                .filter(|e| e.key.starts_with(&watcher.prefix))
                .cloned()
                .collect();

            if matched.is_empty() {
                continue;
            }

            let response = WatchResponse {
                revision,
                events: matched,
            };
            if watcher.sender.send(response).is_err() {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            self.inner.watchers.remove(&id);
            tracing::debug!(watcher_id = id, "Removed closed watcher");
        }
    }

    fn commit_put(&self, key: &str, value: Bytes, lease: Option<LeaseId>) -> Result<(), StoreError> {
        let mut state = self.lock_and_expire()?;
        state.ensure_lease(lease)?;

        let revision = state.revision + 1;
        state.revision = revision;
        let event = state.apply_put(key.to_string(), value, lease, revision);
        self.publish(revision, std::slice::from_ref(&event));
        Ok(())
    }

    fn commit_delete(&self, key: &str) -> Result<u64, StoreError> {
        let mut state = self.lock_and_expire()?;
        if !state.entries.contains_key(key) {
            return Ok(0);
        }

        let revision = state.revision + 1;
        state.revision = revision;
        let events: Vec<WatchEvent> = state.remove_entry(key, revision).into_iter().collect();
        self.publish(revision, &events);
        Ok(1)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let state = self.lock_and_expire()?;
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
                lease: entry.lease,
                create_revision: entry.create_revision,
                mod_revision: entry.mod_revision,
            })
            .collect())
    }

    fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let mut state = self.lock_and_expire()?;

        let ttl = Duration::from_secs(ttl_seconds(ttl));

        state.next_lease_id += 1;
        let id = state.next_lease_id;
        state.leases.insert(
            id,
            Lease {
                ttl,
                deadline: Instant::now() + ttl,
                keys: HashSet::new(),
            },
        );

        tracing::debug!(lease_id = id, ttl_secs = ttl.as_secs(), "Granted lease");
        Ok(id)
    }

    fn refresh_lease(&self, lease: LeaseId) -> Result<Duration, StoreError> {
        let mut state = self.lock_and_expire()?;
        let entry = state
            .leases
            .get_mut(&lease)
            .ok_or(StoreError::LeaseNotFound(lease))?;
        entry.deadline = Instant::now() + entry.ttl;
        Ok(entry.ttl)
    }

    fn commit_txn(&self, ops: Vec<TxnOp>) -> Result<TxnResponse, StoreError> {
        let mut state = self.lock_and_expire()?;

        if self.inner.reject_transactions.load(Ordering::SeqCst) {
            return Ok(TxnResponse {
                succeeded: false,
                revision: state.revision,
            });
        }

        // 先校验全部操作，保证不会只应用一部分
        for op in &ops {
            if let TxnOp::Put { lease, .. } = op {
                state.ensure_lease(*lease)?;
            }
        }

        let revision = state.revision + 1;
        state.revision = revision;

        let mut events = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                TxnOp::Put { key, value, lease } => {
                    events.push(state.apply_put(key, value, lease, revision));
                }
                TxnOp::Delete { key } => {
                    events.extend(state.remove_entry(&key, revision));
                }
            }
        }

        self.publish(revision, &events);
        Ok(TxnResponse {
            succeeded: true,
            revision,
        })
    }

    fn open_watch(
        &self,
        prefix: &str,
    ) -> Result<(WatcherGuard, mpsc::UnboundedReceiver<WatchResponse>), StoreError> {
        // 与提交互斥，保证监听建立后不会漏掉下一次提交
        let _state = self.lock()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::SeqCst);
        self.inner.watchers.insert(
            id,
            Watcher {
                prefix: prefix.to_string(),
                sender,
            },
        );

        tracing::debug!(watcher_id = id, prefix = %prefix, "Opened watch");
        let guard = WatcherGuard {
            inner: Arc::clone(&self.inner),
            id,
        };
        Ok((guard, receiver))
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn put(&self, key: &str, value: Bytes, lease: Option<LeaseId>) -> Result<(), StoreError> {
        self.commit_put(key, value, lease)
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        self.commit_delete(key)
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        self.scan_prefix(prefix)
    }

    async fn grant(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        self.grant_lease(ttl)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<Duration, StoreError> {
        self.refresh_lease(lease)
    }

    async fn txn(&self, ops: Vec<TxnOp>) -> Result<TxnResponse, StoreError> {
        self.commit_txn(ops)
    }

    async fn watch(&self, prefix: &str, cancel: CancellationToken) -> Result<WatchStream, StoreError> {
        let (guard, receiver) = self.open_watch(prefix)?;
        let stream = UnboundedReceiverStream::new(receiver).take_until(cancel.cancelled_owned());
        Ok(Box::pin(GuardedWatchStream {
            stream: Box::pin(stream),
            _guard: guard,
        }))
    }
}
