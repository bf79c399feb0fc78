use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::{LogConfig, LogFormat, LogRotation};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log level {level:?}: {source}")]
    InvalidLevel {
        level: String,
        #[source]
        source: ParseError,
    },
    #[error("Invalid log file path: {0}")]
    InvalidLogFile(String),
    #[error("Failed to open log file: {0}")]
    Appender(String),
    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// 构建日志过滤器，`RUST_LOG` 优先于配置的级别
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level).map_err(|source| TelemetryError::InvalidLevel {
        level: config.level.clone(),
        source,
    })
}

/// 按配置切分的日志文件，文件名为 `<文件名>.<时间>`，超出 `max_files` 的旧文件会被删除
pub fn rolling_appender(
    config: &LogConfig,
    path: &Path,
) -> Result<RollingFileAppender, TelemetryError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| TelemetryError::InvalidLogFile(path.display().to_string()))?;
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    RollingFileAppender::builder()
        .rotation(config.rotation.into())
        .filename_prefix(file_name)
        .max_log_files(config.max_files)
        .build(directory)
        .map_err(|e| TelemetryError::Appender(e.to_string()))
}

/// 安装全局 tracing 订阅者，只能成功调用一次
///
/// 配置了日志文件时经后台线程写入文件，返回的 guard 需要持有到进程退出，
/// 丢弃时会刷新缓冲区。
pub fn init_tracing(config: &LogConfig) -> Result<Option<WorkerGuard>, TelemetryError> {
    let filter = env_filter(config)?;

    let (writer, guard) = match &config.file {
        Some(path) => {
            let appender = rolling_appender(config, path)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .with_file(config.caller_location)
        .with_line_number(config.caller_location);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.with_ansi(false).try_init(),
    };

    result.map_err(|e| TelemetryError::Install(e.to_string()))?;
    Ok(guard)
}
