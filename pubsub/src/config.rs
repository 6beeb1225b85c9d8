//! # **pubsub** 配置

use crate::errors::ConfigError;
use config::{Config, Environment, File};
use serde::{Deserialize, de::DeserializeOwned};
use std::path::PathBuf;
use tokio::time::Duration;
use validator::Validate;

/// 构建分层配置
///
/// 同一份分发与会话配置既可随部署环境覆盖，也可由 Kafka 等实现 crate
/// 以各自的 `config` 目录复用。依次加载 `<root>/default.*`、`<root>/<env>.*` 与 `PUBSUB__` 前缀的环境变量，
/// 其中 root 取自 `PUBSUB_CONFIG_ROOT`，缺省为 `<crate_dir>/config`；
/// env 取自 `PUBSUB_ENV`，缺省为 `dev`。
pub fn build_config(crate_dir: PathBuf) -> Result<Config, ConfigError> {
    let config_root = std::env::var("PUBSUB_CONFIG_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| crate_dir.join("config"));
    let env = std::env::var("PUBSUB_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = Config::builder()
        .add_source(File::from(config_root.join("default")).required(false))
        .add_source(File::from(config_root.join(env)).required(false))
        .add_source(
            Environment::with_prefix("PUBSUB")
                .separator("__")
                .list_separator(","),
        )
        .build()?;
    Ok(config)
}

/// 加载并验证配置节，配置节不存在时取缺省值
pub fn load_section<T>(config: &Config, section: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Validate + Default,
{
    let cfg = match config.get::<T>(section) {
        Ok(cfg) => cfg,
        Err(config::ConfigError::NotFound(_)) => T::default(),
        Err(e) => return Err(e.into()),
    };
    validate(section, &cfg)?;
    Ok(cfg)
}

pub(crate) fn validate<T: Validate>(section: &str, cfg: &T) -> Result<(), ConfigError> {
    cfg.validate().map_err(|e| ConfigError::ValidationError {
        section: section.to_string(),
        key: e
            .field_errors()
            .keys()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(","),
        message: e.to_string(),
    })
}

/// 无已提交偏移时的起始位置
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InitialOffset {
    /// 从最早的消息开始
    #[default]
    Oldest,
    /// 从最新的消息之后开始
    Newest,
}

/// 分发者配置
#[derive(Debug, Deserialize, Validate, Clone)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 异步处理的最大并发数
    #[validate(range(min = 1, max = 65536))]
    pub concurrency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { concurrency: 256 }
    }
}

/// 消费组会话配置
#[derive(Debug, Deserialize, Validate, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// 订阅者与分发者之间的消息通道容量
    #[validate(range(min = 1, max = 65536))]
    pub buffer: usize,
    /// 会话中断后重新加入消费组前的等待时长，单位毫秒
    pub retry_backoff_ms: u64,
}

impl SessionConfig {
    /// 重新加入消费组前的等待时长
    #[inline]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer: 16,
            retry_backoff_ms: 1000,
        }
    }
}
