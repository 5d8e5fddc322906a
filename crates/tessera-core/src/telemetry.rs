//! 日志初始化。
//!
//! # 教案式说明
//! - **意图 (Why)**：各 crate 只通过 `tracing` 宏打点，订阅者由进程入口统一安装；
//! - **契约 (What)**：`RUST_LOG` 存在时优先生效，否则使用调用方给出的默认指令；
//!   重复安装返回 [`TelemetryError::AlreadyInstalled`] 而不是 panic；
//! - **风险 (Trade-offs)**：这里只安装 fmt 层，需要导出到外部系统时应由宿主自行组合订阅者。

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter directive `{directive}`")]
    InvalidDirective {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// 安装全局 fmt 订阅者。
///
/// # Errors
/// 默认指令无法解析或全局订阅者已存在时返回错误。
pub fn init_tracing(default_directive: &str) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|source| {
            TelemetryError::InvalidDirective {
                directive: default_directive.to_owned(),
                source,
            }
        })?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInstalled)
}
