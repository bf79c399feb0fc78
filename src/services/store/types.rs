use std::pin::Pin;

use bytes::Bytes;
use tokio_stream::Stream;

/// 租约标识，由存储分配，对调用方不透明
pub type LeaseId = i64;

/// 前缀扫描返回的一条键值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Bytes,
    /// 绑定的租约
    pub lease: Option<LeaseId>,
    /// 创建该键时的修订号
    pub create_revision: i64,
    /// 最近一次修改的修订号
    pub mod_revision: i64,
}

/// 事务中的单个操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put {
        key: String,
        value: Bytes,
        lease: Option<LeaseId>,
    },
    Delete {
        key: String,
    },
}

impl TxnOp {
    pub fn put(key: impl Into<String>, value: impl Into<Bytes>, lease: Option<LeaseId>) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
            lease,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            TxnOp::Put { key, .. } | TxnOp::Delete { key } => key,
        }
    }
}

/// 事务提交结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnResponse {
    /// 事务是否被应用
    pub succeeded: bool,
    /// 提交后的存储修订号
    pub revision: i64,
}

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
}

/// 单个键的变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub key: String,
    /// 删除事件没有值
    pub value: Option<Bytes>,
    pub revision: i64,
}

/// 存储一次提交产生的变更批次
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResponse {
    pub revision: i64,
    pub events: Vec<WatchEvent>,
}

impl WatchResponse {
    pub fn created(&self) -> impl Iterator<Item = &WatchEvent> {
        self.events.iter().filter(|e| e.kind == EventKind::Created)
    }

    pub fn deleted(&self) -> impl Iterator<Item = &WatchEvent> {
        self.events.iter().filter(|e| e.kind == EventKind::Deleted)
    }
}

/// 长连接的前缀监听流，流结束即监听终止
pub type WatchStream = Pin<Box<dyn Stream<Item = WatchResponse> + Send>>;
