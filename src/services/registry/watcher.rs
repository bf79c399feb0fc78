use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::codec::{self, KeyCodec};
use super::error::{KeyError, RegistryError};
use super::service::Registry;
use super::types::{ServiceKey, ServiceRecord};
use crate::services::store::{WatchEvent, WatchResponse, WatchStream};

impl Registry {
    /// 监控某个环境下某个服务的实例变化
    ///
    /// 每收到存储的一批变更就同步调用一次 `on_change`，直到监听流结束
    /// （`cancel` 被触发、存储关闭或连接断开）。流结束不视为错误，也不会自动重连；
    /// 需要持续监听的调用方应在返回后自行重新调用。
    /// 只有监听无法建立时才返回错误。
    pub async fn watch_service_change<F>(
        &self,
        environment: &str,
        name: &str,
        cancel: CancellationToken,
        mut on_change: F,
    ) -> Result<(), RegistryError>
    where
        F: FnMut(&WatchResponse),
    {
        let mut stream = self.watch_stream(environment, name, cancel).await?;

        while let Some(response) = stream.next().await {
            tracing::debug!(
                environment = %environment,
                service_name = %name,
                revision = response.revision,
                events = response.events.len(),
                "Received service change batch"
            );
            on_change(&response);
        }

        tracing::debug!(
            environment = %environment,
            service_name = %name,
            "Service watch stream ended"
        );
        Ok(())
    }

    /// 以流的形式返回同一个前缀监听
    pub async fn watch_stream(
        &self,
        environment: &str,
        name: &str,
        cancel: CancellationToken,
    ) -> Result<WatchStream, RegistryError> {
        let prefix = self.codec().name_prefix(environment, name);
        let stream = self
            .with_deadline(self.store().watch(&prefix, cancel))
            .await?;

        tracing::info!(
            environment = %environment,
            service_name = %name,
            prefix = %prefix,
            "Watching service changes"
        );
        Ok(stream)
    }
}

impl WatchEvent {
    /// 解析变更对应的实例键
    pub fn service_key(&self, codec: &KeyCodec) -> Result<ServiceKey, KeyError> {
        codec.decode_instance_key(&self.key)
    }

    /// 解码变更携带的实例信息，删除事件返回 `None`
    pub fn record(&self) -> Option<Result<ServiceRecord, RegistryError>> {
        self.value
            .as_ref()
            .map(|value| codec::deserialize_record(&self.key, value))
    }
}
