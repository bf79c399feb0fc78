use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use etcd_client::{
    Client, ConnectOptions, EventType, GetOptions, PutOptions, SortOrder, SortTarget, Txn,
    TxnOp as EtcdTxnOp, WatchOptions,
};
use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;

use super::error::StoreError;
use super::types::{
    EventKind, KeyValue, LeaseId, TxnOp, TxnResponse, WatchEvent, WatchResponse, WatchStream,
};
use super::{CoordinationStore, ttl_seconds};
use crate::config::EtcdConfig;

/// etcd v3 协调存储
///
/// `Client` 内部共享同一个 gRPC 通道，每次调用克隆一份句柄即可并发使用。
/// 不设置请求级超时，超时由调用方（[`crate::Registry`]）统一控制，避免截断监听流。
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    endpoints: Vec<String>,
}

impl fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdStore")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl EtcdStore {
    pub async fn connect(config: &EtcdConfig) -> Result<Self, StoreError> {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(config.connect_timeout())
            .with_keep_alive(config.keep_alive_interval(), config.keep_alive_timeout());
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }

        let client = Client::connect(config.endpoints.clone(), Some(options))
            .await
            .map_err(|e| {
                tracing::error!(endpoints = ?config.endpoints, error = %e, "Failed to connect to etcd");
                store_error(e, None)
            })?;

        tracing::info!(endpoints = ?config.endpoints, "Connected to etcd");
        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
        })
    }

    /// 复用已建立的客户端
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            endpoints: Vec::new(),
        }
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn put(&self, key: &str, value: Bytes, lease: Option<LeaseId>) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client
            .put(key, value.to_vec(), lease.map(|id| PutOptions::new().with_lease(id)))
            .await
            .map_err(|e| store_error(e, lease))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, StoreError> {
        let mut client = self.client.clone();
        let response = client
            .delete(key, None)
            .await
            .map_err(|e| store_error(e, None))?;
        Ok(u64::try_from(response.deleted()).unwrap_or_default())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let mut client = self.client.clone();
        let options = GetOptions::new()
            .with_prefix()
            .with_sort(SortTarget::Key, SortOrder::Ascend);
        let response = client
            .get(prefix, Some(options))
            .await
            .map_err(|e| store_error(e, None))?;

        Ok(response
            .kvs()
            .iter()
            .map(|kv| KeyValue {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
                value: Bytes::copy_from_slice(kv.value()),
                lease: (kv.lease() != 0).then_some(kv.lease()),
                create_revision: kv.create_revision(),
                mod_revision: kv.mod_revision(),
            })
            .collect())
    }

    async fn grant(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let mut client = self.client.clone();
        let secs = ttl_seconds(ttl);
        let response = client
            .lease_grant(i64::try_from(secs).unwrap_or(i64::MAX), None)
            .await
            .map_err(|e| store_error(e, None))?;

        tracing::debug!(lease_id = response.id(), ttl_secs = response.ttl(), "Granted lease");
        Ok(response.id())
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<Duration, StoreError> {
        let mut client = self.client.clone();
        let (mut keeper, mut responses) = client
            .lease_keep_alive(lease)
            .await
            .map_err(|e| store_error(e, Some(lease)))?;
        keeper
            .keep_alive()
            .await
            .map_err(|e| store_error(e, Some(lease)))?;

        match responses
            .message()
            .await
            .map_err(|e| store_error(e, Some(lease)))?
        {
            // TTL 为 0 表示租约已过期
            Some(response) if response.ttl() > 0 => {
                Ok(Duration::from_secs(u64::try_from(response.ttl()).unwrap_or_default()))
            }
            _ => Err(StoreError::LeaseNotFound(lease)),
        }
    }

    async fn txn(&self, ops: Vec<TxnOp>) -> Result<TxnResponse, StoreError> {
        let lease = ops.iter().find_map(|op| match op {
            TxnOp::Put { lease, .. } => *lease,
            TxnOp::Delete { .. } => None,
        });
        let ops: Vec<EtcdTxnOp> = ops
            .into_iter()
            .map(|op| match op {
                TxnOp::Put { key, value, lease } => EtcdTxnOp::put(
                    key,
                    value.to_vec(),
                    lease.map(|id| PutOptions::new().with_lease(id)),
                ),
                TxnOp::Delete { key } => EtcdTxnOp::delete(key, None),
            })
            .collect();

        let mut client = self.client.clone();
        let response = client
            .txn(Txn::new().and_then(ops))
            .await
            .map_err(|e| store_error(e, lease))?;

        Ok(TxnResponse {
            succeeded: response.succeeded(),
            revision: response.header().map(|h| h.revision()).unwrap_or_default(),
        })
    }

    async fn watch(&self, prefix: &str, cancel: CancellationToken) -> Result<WatchStream, StoreError> {
        let mut client = self.client.clone();
        let (watcher, watch_stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| store_error(e, None))?;
        tracing::debug!(prefix = %prefix, watch_id = watcher.watch_id(), "Opened etcd watch");

        let prefix = prefix.to_string();
        let responses = stream::unfold(
            (watcher, watch_stream),
            move |(watcher, mut watch_stream)| {
                let prefix = prefix.clone();
                async move {
                    loop {
                        match watch_stream.message().await {
                            Ok(Some(response)) => {
                                if response.canceled() {
                                    tracing::warn!(
                                        prefix = %prefix,
                                        "etcd watch was canceled by the server"
                                    );
                                    return None;
                                }

                                let events: Vec<WatchEvent> =
                                    response.events().iter().filter_map(convert_event).collect();
                                // 创建确认与进度通知不携带事件
                                if events.is_empty() {
                                    continue;
                                }

                                let revision = response
                                    .header()
                                    .map(|h| h.revision())
                                    .unwrap_or_default();
                                return Some((
                                    WatchResponse { revision, events },
                                    (watcher, watch_stream),
                                ));
                            }
                            Ok(None) => return None,
                            Err(e) => {
                                tracing::warn!(prefix = %prefix, error = %e, "etcd watch stream failed");
                                return None;
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(responses.take_until(cancel.cancelled_owned())))
    }
}

fn convert_event(event: &etcd_client::Event) -> Option<WatchEvent> {
    let kv = event.kv()?;
    let kind = event_kind(event.event_type(), kv.create_revision(), kv.mod_revision());
    let value = (kind != EventKind::Deleted).then(|| Bytes::copy_from_slice(kv.value()));

    Some(WatchEvent {
        kind,
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value,
        revision: kv.mod_revision(),
    })
}

fn event_kind(event_type: EventType, create_revision: i64, mod_revision: i64) -> EventKind {
    match event_type {
        EventType::Delete => EventKind::Deleted,
        EventType::Put if create_revision == mod_revision => EventKind::Created,
        EventType::Put => EventKind::Modified,
    }
}

// 租约相关调用中 etcd 返回 "requested lease not found"
fn store_error(error: etcd_client::Error, lease: Option<LeaseId>) -> StoreError {
    let message = error.to_string();
    match lease {
        Some(id) if message.contains("lease not found") => StoreError::LeaseNotFound(id),
        _ => StoreError::Unavailable(message),
    }
}
