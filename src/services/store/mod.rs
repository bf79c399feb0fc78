//! Coordination store module
//!
//! The registry talks to the coordination store only through the
//! [`CoordinationStore`] trait:
//! - `types`: key/value, transaction and watch types
//! - `error`: store error type
//! - `memory`: in-process implementation with leases, transactions and watches
//! - `etcd`: etcd v3 implementation on top of `etcd-client`

pub mod error;
pub mod etcd;
pub mod memory;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

pub use error::StoreError;
pub use etcd::EtcdStore;
pub use memory::MemoryStore;
pub use types::{
    EventKind, KeyValue, LeaseId, TxnOp, TxnResponse, WatchEvent, WatchResponse, WatchStream,
};

/// 注册中心所需的协调存储能力
#[async_trait]
pub trait CoordinationStore: Send + Sync + std::fmt::Debug {
    /// 写入单个键，可绑定租约
    async fn put(&self, key: &str, value: Bytes, lease: Option<LeaseId>) -> Result<(), StoreError>;

    /// 删除单个键，返回删除的键数量（键不存在时为 0）
    async fn delete(&self, key: &str) -> Result<u64, StoreError>;

    /// 前缀扫描，按键排序返回
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;

    /// 申请一个 TTL 租约
    async fn grant(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    /// 续约，返回续约后的 TTL
    async fn keep_alive(&self, lease: LeaseId) -> Result<Duration, StoreError>;

    /// 原子提交多个操作，要么全部生效要么全部不生效
    async fn txn(&self, ops: Vec<TxnOp>) -> Result<TxnResponse, StoreError>;

    /// 打开前缀监听；`cancel` 被触发、存储关闭或连接断开时流结束
    async fn watch(&self, prefix: &str, cancel: CancellationToken) -> Result<WatchStream, StoreError>;
}

/// 租约 TTL 以秒为粒度，不足一秒向上取整，最少一秒
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}
