use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 服务实例信息，每个运行中的实例一条
///
/// JSON 字段名与已有部署保持一致；可选字段缺省时不写入。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// 服务标识，在同一服务名下唯一，推荐 ip:port
    pub id: String,

    /// 服务名称，同一组服务名称相同
    pub name: String,

    /// 运行环境，如 testing、staging、production
    pub environment: String,

    #[serde(rename = "internal_ip", default, skip_serializing_if = "Option::is_none")]
    pub internal_address: Option<String>,

    #[serde(rename = "public_ip", default, skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// 可单独访问该实例的地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(rename = "reload_url", default)]
    pub reload_url: String,

    /// 当前部署的版本
    #[serde(rename = "git_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(rename = "time", default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,

    #[serde(rename = "is_metrics_api", default, skip_serializing_if = "Option::is_none")]
    pub has_metrics_endpoint: Option<bool>,

    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, String>>,
}

impl ServiceRecord {
    pub fn new(
        environment: impl Into<String>,
        name: impl Into<String>,
        id: impl Into<String>,
        reload_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            environment: environment.into(),
            internal_address: None,
            public_address: None,
            port: None,
            url: None,
            reload_url: reload_url.into(),
            version: None,
            registered_at: None,
            has_metrics_endpoint: None,
            attributes: None,
        }
    }

    pub fn with_internal_address(mut self, address: impl Into<String>) -> Self {
        self.internal_address = Some(address.into());
        self
    }

    pub fn with_public_address(mut self, address: impl Into<String>) -> Self {
        self.public_address = Some(address.into());
        self
    }

    pub fn with_port(mut self, port: i32) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_registered_at(mut self, at: DateTime<Utc>) -> Self {
        self.registered_at = Some(at);
        self
    }

    pub fn with_metrics_endpoint(mut self, enabled: bool) -> Self {
        self.has_metrics_endpoint = Some(enabled);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// 该实例在键空间中的标识
    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            environment: self.environment.clone(),
            name: self.name.clone(),
            id: self.id.clone(),
        }
    }
}

// 服务组信息，保持扫描顺序
pub type Services = Vec<ServiceRecord>;

/// 实例键解码后的三元组
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub environment: String,
    pub name: String,
    pub id: String,
}
