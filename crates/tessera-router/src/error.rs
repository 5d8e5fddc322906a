//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 区分生命周期误用、启动失败、运行期致命故障与收尾阶段的聚合失败；
//! - 局部故障（单条后端路由、单个畸形信封）在反应器内部消化，不出现在这里，
//!   控制命令显式操作路由时除外。

use std::io;

use tessera_core::{ErrorCategory, RouteId};
use tessera_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    /// 反应器已在运行或正在启动。
    #[error("demultiplexer is already running")]
    AlreadyRunning,

    /// 没有正在运行的反应器可供停止或查询。
    #[error("demultiplexer is not running")]
    NotRunning,

    /// 反应器线程无法创建。
    #[error("failed to spawn the reactor thread")]
    Spawn {
        #[source]
        source: io::Error,
    },

    /// 对外端点绑定失败，路由器保持停止状态。
    #[error("failed to bind frontend `{address}`")]
    Bind {
        address: String,
        #[source]
        source: TransportError,
    },

    /// 对外端点在运行期失效，反应器已退出。
    #[error("frontend `{address}` failed")]
    Frontend {
        address: String,
        #[source]
        source: TransportError,
    },

    /// 控制命令要求创建的后端路由无法建立。
    #[error("backend route {route} could not be opened")]
    Backend {
        route: RouteId,
        #[source]
        source: TransportError,
    },

    /// 收尾阶段有套接字关闭失败；所有关闭都已尝试。
    #[error("{} socket(s) failed to close during teardown", .failures.len())]
    Teardown { failures: Vec<TransportError> },

    /// 反应器已退出，命令没有被处理。
    #[error("reactor is no longer processing commands")]
    ReactorGone,

    #[error("reactor thread panicked")]
    ReactorPanicked,
}

impl RouterError {
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AlreadyRunning | Self::NotRunning | Self::ReactorGone => ErrorCategory::State,
            Self::Spawn { .. }
            | Self::Bind { .. }
            | Self::Frontend { .. }
            | Self::ReactorPanicked => ErrorCategory::Fatal,
            Self::Backend { .. } | Self::Teardown { .. } => ErrorCategory::Recoverable,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "tessera.router.already_running",
            Self::NotRunning => "tessera.router.not_running",
            Self::Spawn { .. } => "tessera.router.spawn_failed",
            Self::Bind { .. } => "tessera.router.bind_failed",
            Self::Frontend { .. } => "tessera.router.frontend_failed",
            Self::Backend { .. } => "tessera.router.backend_failed",
            Self::Teardown { .. } => "tessera.router.teardown_failed",
            Self::ReactorGone => "tessera.router.reactor_gone",
            Self::ReactorPanicked => "tessera.router.reactor_panicked",
        }
    }
}
