use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::services::registry::DEFAULT_KEY_PREFIX;

/// 环境变量覆盖配置时使用的前缀
pub const ENV_PREFIX: &str = "DISCOVERY_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid environment override: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub etcd: EtcdConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 键空间根前缀
    pub key_prefix: String,
    /// 单次存储请求的超时时间（秒）
    pub request_timeout_secs: u64,
    /// 注册时默认的租约 TTL（秒）
    pub default_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            request_timeout_secs: 5,
            default_ttl_secs: 30,
        }
    }
}

impl RegistryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// etcd 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub connect_timeout_secs: u64,
    /// HTTP/2 保活探测间隔（秒）
    pub keep_alive_interval_secs: u64,
    pub keep_alive_timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            connect_timeout_secs: 5,
            keep_alive_interval_secs: 30,
            keep_alive_timeout_secs: 10,
            username: None,
            password: None,
        }
    }
}

impl EtcdConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    #[default]
    Json,
}

/// 日志文件切分周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// 是否记录调用位置（文件与行号）
    pub caller_location: bool,
    /// 日志文件路径，未设置时输出到标准输出
    pub file: Option<PathBuf>,
    pub rotation: LogRotation,
    /// 最多保留的日志文件数量
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            caller_location: false,
            file: None,
            rotation: LogRotation::Daily,
            max_files: 7,
        }
    }
}

// 可通过 DISCOVERY_* 环境变量覆盖的字段
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    key_prefix: Option<String>,
    request_timeout_secs: Option<u64>,
    default_ttl_secs: Option<u64>,
    etcd_endpoints: Option<Vec<String>>,
    etcd_username: Option<String>,
    etcd_password: Option<String>,
    log_level: Option<String>,
    log_format: Option<LogFormat>,
    log_file: Option<PathBuf>,
}

impl Config {
    /// 读取工作目录下的 config.toml，并应用 .env 与环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_path("config.toml")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path)?;
        let mut config = Self::from_toml(&config_str)?;

        // .env 不存在时忽略
        let _ = dotenvy::dotenv();
        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(config_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(config_str)?)
    }

    /// 应用 `DISCOVERY_` 前缀的键值覆盖
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let overrides: EnvOverrides = envy::prefixed(ENV_PREFIX).from_iter(vars)?;

        if let Some(key_prefix) = overrides.key_prefix {
            self.registry.key_prefix = key_prefix;
        }
        if let Some(secs) = overrides.request_timeout_secs {
            self.registry.request_timeout_secs = secs;
        }
        if let Some(secs) = overrides.default_ttl_secs {
            self.registry.default_ttl_secs = secs;
        }
        if let Some(endpoints) = overrides.etcd_endpoints {
            self.etcd.endpoints = endpoints;
        }
        if let Some(username) = overrides.etcd_username {
            self.etcd.username = Some(username);
        }
        if let Some(password) = overrides.etcd_password {
            self.etcd.password = Some(password);
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
        if let Some(format) = overrides.log_format {
            self.log.format = format;
        }
        if let Some(file) = overrides.log_file {
            self.log.file = Some(file);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = self.registry.key_prefix.trim_end_matches('/');
        if !prefix.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "registry.key_prefix must be an absolute path, got {:?}",
                self.registry.key_prefix
            )));
        }
        if self.registry.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "registry.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.registry.default_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "registry.default_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.etcd.endpoints.iter().all(|e| e.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "etcd.endpoints must contain at least one address".to_string(),
            ));
        }
        if self.log.file.is_some() && self.log.max_files == 0 {
            return Err(ConfigError::Invalid(
                "log.max_files must be greater than zero when log.file is set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.registry.key_prefix, "/services");
        assert_eq!(config.registry.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.registry.default_ttl(), Duration::from_secs(30));
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(config.log.file.is_none());
        assert_eq!(config.log.rotation, LogRotation::Daily);
        assert_eq!(config.etcd.endpoints, vec!["127.0.0.1:2379".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
            [registry]
            key_prefix = "/fleet"

            [log]
            level = "debug"
            format = "text"
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.key_prefix, "/fleet");
        assert_eq!(config.registry.request_timeout_secs, 5);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(vars(&[
                ("DISCOVERY_KEY_PREFIX", "/registry"),
                ("DISCOVERY_DEFAULT_TTL_SECS", "10"),
                ("DISCOVERY_LOG_FORMAT", "text"),
                ("UNRELATED", "x"),
            ]))
            .unwrap();

        assert_eq!(config.registry.key_prefix, "/registry");
        assert_eq!(config.registry.default_ttl_secs, 10);
        assert_eq!(config.registry.request_timeout_secs, 5);
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn test_etcd_and_log_file_sections() {
        let config = Config::from_toml(
            r#"
            [etcd]
            endpoints = ["10.0.0.1:2379", "10.0.0.2:2379"]
            connect_timeout_secs = 3

            [log]
            file = "/var/log/discovery/registry.log"
            rotation = "hourly"
            max_files = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.etcd.endpoints.len(), 2);
        assert_eq!(config.etcd.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.etcd.keep_alive_interval(), Duration::from_secs(30));
        assert_eq!(
            config.log.file.as_deref(),
            Some(Path::new("/var/log/discovery/registry.log"))
        );
        assert_eq!(config.log.rotation, LogRotation::Hourly);
        assert_eq!(config.log.max_files, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_etcd_and_log_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(vars(&[
                ("DISCOVERY_ETCD_ENDPOINTS", "10.0.0.1:2379,10.0.0.2:2379"),
                ("DISCOVERY_ETCD_USERNAME", "registry"),
                ("DISCOVERY_LOG_FILE", "logs/registry.log"),
            ]))
            .unwrap();

        assert_eq!(
            config.etcd.endpoints,
            vec!["10.0.0.1:2379".to_string(), "10.0.0.2:2379".to_string()]
        );
        assert_eq!(config.etcd.username.as_deref(), Some("registry"));
        assert!(config.etcd.password.is_none());
        assert_eq!(config.log.file, Some(PathBuf::from("logs/registry.log")));
    }

    #[test]
    fn test_bad_env_override_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(vars(&[("DISCOVERY_DEFAULT_TTL_SECS", "soon")]));

        assert!(matches!(result, Err(ConfigError::Env(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.registry.key_prefix = "services".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.registry.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.etcd.endpoints.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log.file = Some(PathBuf::from("registry.log"));
        config.log.max_files = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[registry]\nrequest_timeout_secs = 2").unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.registry.request_timeout(), Duration::from_secs(2));

        assert!(matches!(
            Config::from_path("/nonexistent/config.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
