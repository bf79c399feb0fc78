use std::time::Duration;

use thiserror::Error;

use crate::services::store::StoreError;

/// 键解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid key prefix: {0}")]
    InvalidPrefix(String),

    #[error("Key {key} is outside root {root}")]
    OutsideRoot { key: String, root: String },

    #[error("Key {0} is not an instance key")]
    NotInstanceKey(String),

    #[error("Invalid {field}: {value:?}")]
    InvalidComponent { field: &'static str, value: String },
}

/// 注册中心错误类型
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Service registration failed: {reason}")]
    Registration {
        reason: String,
        #[source]
        source: Option<StoreError>,
    },

    #[error("Failed to decode service record at {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode service record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Service not found: {environment}/{name}/{id}")]
    NotFound {
        environment: String,
        name: String,
        id: String,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("TTL must be greater than zero")]
    InvalidTtl,

    #[error("Store request timed out after {0:?}")]
    Timeout(Duration),
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }

    // 注册路径上的存储错误统一视为注册失败
    pub(crate) fn into_registration(self, reason: &str) -> Self {
        match self {
            RegistryError::StoreUnavailable(source) => RegistryError::Registration {
                reason: reason.to_string(),
                source: Some(source),
            },
            other => other,
        }
    }
}
