use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::codec::{self, KeyCodec};
use super::error::RegistryError;
use super::types::{ServiceRecord, Services};
use crate::config::RegistryConfig;
use crate::services::store::{CoordinationStore, LeaseId, StoreError, TxnOp};

/// 服务注册中心
///
/// 无状态门面：不缓存任何数据，每次读写都直接访问协调存储。
/// 可以被多个任务并发克隆使用，存储句柄本身负责并发安全。
#[derive(Debug, Clone)]
pub struct Registry {
    store: Arc<dyn CoordinationStore>,
    codec: KeyCodec,
    request_timeout: Duration,
    default_ttl: Duration,
}

impl Registry {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        let config = RegistryConfig::default();
        Self {
            store,
            codec: KeyCodec::default(),
            request_timeout: config.request_timeout(),
            default_ttl: config.default_ttl(),
        }
    }

    pub fn with_config(
        store: Arc<dyn CoordinationStore>,
        config: &RegistryConfig,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            store,
            codec: KeyCodec::new(config.key_prefix.as_str())?,
            request_timeout: config.request_timeout(),
            default_ttl: config.default_ttl(),
        })
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// 配置中的默认租约 TTL
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// 注册一个服务实例，服务启动时调用
    ///
    /// 申请 `ttl` 租约后，在同一个事务内写入实例键和服务名标记键，两者绑定同一租约。
    /// 返回的租约需要由调用方在过期前续约（[`Registry::keep_alive`]）或重新注册。
    pub async fn register_service(
        &self,
        record: &ServiceRecord,
        ttl: Duration,
    ) -> Result<LeaseId, RegistryError> {
        KeyCodec::validate_record(record)?;
        if ttl.is_zero() {
            return Err(RegistryError::InvalidTtl);
        }
        let payload = codec::serialize_record(record)?;

        let lease = self
            .with_deadline(self.store.grant(ttl))
            .await
            .map_err(|e| e.into_registration("lease grant failed"))?;

        self.commit_registration(record, payload, lease).await?;

        tracing::info!(
            environment = %record.environment,
            service_name = %record.name,
            service_id = %record.id,
            lease_id = lease,
            ttl_secs = ttl.as_secs(),
            "Registered service"
        );

        Ok(lease)
    }

    /// 使用已有租约重新注册（续约的另一种方式）
    pub async fn register_service_with_lease(
        &self,
        record: &ServiceRecord,
        lease: LeaseId,
    ) -> Result<(), RegistryError> {
        KeyCodec::validate_record(record)?;
        let payload = codec::serialize_record(record)?;

        self.commit_registration(record, payload, lease).await?;

        tracing::debug!(
            environment = %record.environment,
            service_name = %record.name,
            service_id = %record.id,
            lease_id = lease,
            "Re-registered service on existing lease"
        );
        Ok(())
    }

    /// 续约，返回续约后的 TTL
    pub async fn keep_alive(&self, lease: LeaseId) -> Result<Duration, RegistryError> {
        match self.with_deadline(self.store.keep_alive(lease)).await {
            Err(RegistryError::StoreUnavailable(StoreError::LeaseNotFound(id))) => {
                Err(RegistryError::Registration {
                    reason: format!("lease {id} has expired or was never granted"),
                    source: Some(StoreError::LeaseNotFound(id)),
                })
            }
            other => other,
        }
    }

    async fn commit_registration(
        &self,
        record: &ServiceRecord,
        payload: Vec<u8>,
        lease: LeaseId,
    ) -> Result<(), RegistryError> {
        let ops = vec![
            TxnOp::put(self.codec.record_key(record), payload, Some(lease)),
            TxnOp::put(
                self.codec.name_key(&record.environment, &record.name),
                Bytes::from(record.name.clone()),
                Some(lease),
            ),
        ];

        let response = self
            .with_deadline(self.store.txn(ops))
            .await
            .map_err(|e| e.into_registration("registration transaction failed"))?;

        if !response.succeeded {
            tracing::warn!(
                environment = %record.environment,
                service_name = %record.name,
                service_id = %record.id,
                lease_id = lease,
                "Registration transaction was rejected"
            );
            return Err(RegistryError::Registration {
                reason: "registration transaction was rejected".to_string(),
                source: None,
            });
        }

        Ok(())
    }

    /// 注销服务实例，服务关闭时调用
    ///
    /// 只删除实例键；服务名标记键可能被其他实例共享，随租约自然过期。
    /// 删除不存在的键不视为错误。
    pub async fn deregister_service(&self, record: &ServiceRecord) -> Result<(), RegistryError> {
        let key = self.codec.record_key(record);
        let deleted = self.with_deadline(self.store.delete(&key)).await?;

        tracing::info!(
            environment = %record.environment,
            service_name = %record.name,
            service_id = %record.id,
            deleted,
            "Deregistered service"
        );
        Ok(())
    }

    // 根据运行环境和名称检索服务
    pub async fn get_services_by_environment_and_name(
        &self,
        environment: &str,
        name: &str,
    ) -> Result<Services, RegistryError> {
        let services = self
            .services_by_prefix(&self.codec.name_prefix(environment, name))
            .await?;

        Ok(services
            .into_iter()
            .filter(|s| s.environment == environment && s.name == name)
            .collect())
    }

    // 根据运行环境检索服务
    pub async fn get_services_by_environment(
        &self,
        environment: &str,
    ) -> Result<Services, RegistryError> {
        let services = self
            .services_by_prefix(&self.codec.environment_prefix(environment))
            .await?;

        Ok(services
            .into_iter()
            .filter(|s| s.environment == environment)
            .collect())
    }

    // 根据服务名称检索服务（跨所有环境）
    pub async fn get_services_by_name(&self, name: &str) -> Result<Services, RegistryError> {
        let services = self.services_by_prefix(&self.codec.root_prefix()).await?;

        Ok(services.into_iter().filter(|s| s.name == name).collect())
    }

    /// 根据唯一标识检索服务，找不到时返回 [`RegistryError::NotFound`]
    pub async fn get_service_by_id(
        &self,
        environment: &str,
        name: &str,
        id: &str,
    ) -> Result<ServiceRecord, RegistryError> {
        let services = self
            .services_by_prefix(&self.codec.instance_key(environment, name, id))
            .await?;

        services
            .into_iter()
            .find(|s| s.environment == environment && s.name == name && s.id == id)
            .ok_or_else(|| RegistryError::NotFound {
                environment: environment.to_string(),
                name: name.to_string(),
                id: id.to_string(),
            })
    }

    // 获取所有服务信息
    pub async fn get_all_services(&self) -> Result<Services, RegistryError> {
        self.services_by_prefix(&self.codec.root_prefix()).await
    }

    // 获取服务实例数量
    pub async fn get_service_count(
        &self,
        environment: &str,
        name: &str,
    ) -> Result<usize, RegistryError> {
        Ok(self
            .get_services_by_environment_and_name(environment, name)
            .await?
            .len())
    }

    // 前缀扫描并解码；任何一条记录解码失败都会中止整个查询
    async fn services_by_prefix(&self, prefix: &str) -> Result<Services, RegistryError> {
        let kvs = self.with_deadline(self.store.get_prefix(prefix)).await?;

        let mut services = Services::with_capacity(kvs.len());
        for kv in kvs {
            if !self.codec.is_instance_key(&kv.key) {
                continue;
            }

            let record = codec::deserialize_record(&kv.key, &kv.value).inspect_err(|e| {
                tracing::warn!(key = %kv.key, error = %e, "Corrupt service record, aborting query");
            })?;
            services.push(record);
        }

        tracing::debug!(prefix = %prefix, count = services.len(), "Scanned services");
        Ok(services)
    }

    pub(super) async fn with_deadline<T, F>(&self, fut: F) -> Result<T, RegistryError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(RegistryError::from),
            Err(_) => Err(RegistryError::Timeout(self.request_timeout)),
        }
    }
}
