//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 路由器、注册表与 TCP 传输的可调参数集中在一份 TOML 文档中，部署方只需维护一个文件；
//! - 每个字段都有默认值，空文档即可得到可运行的配置。
//!
//! ## 设计要求（What）
//! - 时长统一以毫秒整数表示（`*_ms`），通过访问器转换为 [`Duration`]；
//! - [`TesseraConfig::validate`] 拒绝会导致忙等或无界阻塞的取值（例如 0 毫秒轮询间隔）。
//!
//! ## 示例
//! ```toml
//! [router]
//! bind_address = "tcp://0.0.0.0:7400"
//! poll_interval_ms = 50
//!
//! [registry]
//! refresh_interval_ms = 5000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::route::DEFAULT_ROUTE_SCHEME;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TesseraConfig {
    pub router: RouterSettings,
    pub registry: RegistrySettings,
    pub tcp: TcpSettings,
}

impl TesseraConfig {
    /// 从 TOML 文本解析并校验。
    ///
    /// # Errors
    /// 语法错误返回 [`ConfigError::Parse`]，取值越界返回 [`ConfigError::Invalid`]。
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载。
    ///
    /// # Errors
    /// 读取失败返回 [`ConfigError::Read`]，其余同 [`TesseraConfig::from_toml_str`]。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// 校验各字段取值。
    ///
    /// # Errors
    /// 第一个越界字段以 [`ConfigError::Invalid`] 返回。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.bind_address.is_empty() {
            return Err(invalid("router.bind_address", "must not be empty"));
        }
        if self.router.route_scheme.is_empty() {
            return Err(invalid("router.route_scheme", "must not be empty"));
        }
        if self.router.poll_interval_ms == 0 {
            return Err(invalid("router.poll_interval_ms", "must be positive"));
        }
        if self.registry.report_interval_ms == 0 {
            return Err(invalid("registry.report_interval_ms", "must be positive"));
        }
        if self.tcp.max_frame_len == 0 {
            return Err(invalid("tcp.max_frame_len", "must be positive"));
        }
        if self.tcp.io_threads == 0 {
            return Err(invalid("tcp.io_threads", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_owned(),
    }
}

/// 路由器参数。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RouterSettings {
    /// 对外端点地址。
    pub bind_address: String,
    /// 内部租户端点使用的 scheme。
    pub route_scheme: String,
    /// 单次轮询的最长阻塞时间，同时是 `stop()` 的最坏响应延迟。
    pub poll_interval_ms: u64,
    /// 路由表调试日志的输出间隔，0 表示关闭。
    pub stats_interval_ms: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            bind_address: "inproc://tessera-frontend".to_owned(),
            route_scheme: DEFAULT_ROUTE_SCHEME.to_owned(),
            poll_interval_ms: 100,
            stats_interval_ms: 15_000,
        }
    }
}

impl RouterSettings {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_ms > 0).then(|| Duration::from_millis(self.stats_interval_ms))
    }
}

/// 注册表参数。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    /// 后台刷新间隔，0 表示不启动刷新线程。
    pub refresh_interval_ms: u64,
    /// 调用表日志输出间隔。
    pub report_interval_ms: u64,
    /// 已断开实例在“离场账本”中的保留时长。
    pub departed_retention_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 5_000,
            report_interval_ms: 15_000,
            departed_retention_ms: 60_000,
        }
    }
}

impl RegistrySettings {
    #[must_use]
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_ms > 0).then(|| Duration::from_millis(self.refresh_interval_ms))
    }

    #[must_use]
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    #[must_use]
    pub fn departed_retention(&self) -> Duration {
        Duration::from_millis(self.departed_retention_ms)
    }
}

/// TCP 传输参数。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TcpSettings {
    pub connect_timeout_ms: u64,
    /// 单帧长度上限，超限视为协议错误并关闭连接。
    pub max_frame_len: usize,
    /// IO 运行时工作线程数。
    pub io_threads: usize,
    pub nodelay: bool,
    /// TCP keepalive 空闲时长，0 表示不开启。
    pub keepalive_ms: u64,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            max_frame_len: 16 * 1024 * 1024,
            io_threads: 2,
            nodelay: true,
            keepalive_ms: 30_000,
        }
    }
}

impl TcpSettings {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_ms > 0).then(|| Duration::from_millis(self.keepalive_ms))
    }
}
