//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 注册表处在三类协作方之间：实例连接服务、远程调用器实现、调用方；
//!   三者的失败分别落在 [`ConnectionError`]、[`InvokerError`] 与 [`RegistryError`]；
//! - “节点不存在”与“传输失败”必须可区分：前者意味着没有实例宣告承载该节点，
//!   后者意味着承载者存在但暂时不可达。

use std::io;

use tessera_core::{ErrorCategory, InstanceId, NodeId, TenantId};
use tessera_transport::TransportError;
use thiserror::Error;

/// 实例连接的失败。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// 连接已不再活跃。
    #[error("instance {instance} is no longer connected")]
    Closed { instance: InstanceId },

    /// 无法取得实例元数据（承载节点集合与负载）。
    #[error("metadata of instance {instance} is unavailable: {detail}")]
    Metadata { instance: InstanceId, detail: String },

    /// 实例无法为节点提供可路由地址。
    #[error("no route to node {node}: {detail}")]
    Route { node: NodeId, detail: String },
}

impl ConnectionError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Closed { .. } => "tessera.connection.closed",
            Self::Metadata { .. } => "tessera.connection.metadata_unavailable",
            Self::Route { .. } => "tessera.connection.no_route",
        }
    }
}

/// 远程调用器的失败。
#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("invoker has not been started")]
    NotStarted,

    #[error("invoker is already started against `{address}`")]
    AlreadyStarted { address: String },

    /// 启动时无法连接到节点地址。
    #[error("invoker could not connect to `{address}`")]
    Connect {
        address: String,
        #[source]
        source: TransportError,
    },

    /// 已启动的调用器在收发时遇到传输故障；调用方应重新向注册表申请调用器。
    #[error("invoker transport failed")]
    Transport(#[from] TransportError),

    /// 停止时关闭底层连接失败。
    #[error("invoker for `{address}` did not stop cleanly")]
    Stop {
        address: String,
        #[source]
        source: TransportError,
    },
}

impl InvokerError {
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NotStarted | Self::AlreadyStarted { .. } => ErrorCategory::State,
            Self::Connect { .. } | Self::Transport(_) | Self::Stop { .. } => {
                ErrorCategory::Recoverable
            }
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotStarted => "tessera.invoker.not_started",
            Self::AlreadyStarted { .. } => "tessera.invoker.already_started",
            Self::Connect { .. } => "tessera.invoker.connect_failed",
            Self::Transport(_) => "tessera.invoker.transport_failed",
            Self::Stop { .. } => "tessera.invoker.stop_failed",
        }
    }
}

/// 注册表对调用方暴露的错误。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `AlreadyRunning`/`NotRunning`：生命周期误用，注册表状态不变；
///   - `TenantNotFound`/`NodeNotFound`：当前没有实例宣告承载目标；
///   - `Route`/`Start`：承载者存在但懒启动失败，条目保持未启动，下次调用重试；
///   - `Teardown`：停止过程中部分调用器停止失败，所有调用器都已尝试停止。
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invoker registry is already running")]
    AlreadyRunning,

    #[error("invoker registry is not running")]
    NotRunning,

    #[error("no instance hosts tenant `{tenant}`")]
    TenantNotFound { tenant: TenantId },

    #[error("no invoker for node {node}")]
    NodeNotFound { node: NodeId },

    /// 实例无法为节点打开路由。
    #[error("could not open a route to node {node}")]
    Route {
        node: NodeId,
        #[source]
        source: ConnectionError,
    },

    /// 调用器启动失败。
    #[error("invoker for node {node} failed to start")]
    Start {
        node: NodeId,
        #[source]
        source: InvokerError,
    },

    #[error("failed to spawn the registry worker thread")]
    Spawn {
        #[source]
        source: io::Error,
    },

    #[error("{} invoker(s) failed to stop", .failures.len())]
    Teardown { failures: Vec<InvokerError> },
}

impl RegistryError {
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AlreadyRunning | Self::NotRunning => ErrorCategory::State,
            Self::TenantNotFound { .. } | Self::NodeNotFound { .. } => ErrorCategory::NotFound,
            Self::Route { .. } | Self::Start { .. } | Self::Teardown { .. } => {
                ErrorCategory::Recoverable
            }
            Self::Spawn { .. } => ErrorCategory::Fatal,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "tessera.registry.already_running",
            Self::NotRunning => "tessera.registry.not_running",
            Self::TenantNotFound { .. } => "tessera.registry.tenant_not_found",
            Self::NodeNotFound { .. } => "tessera.registry.node_not_found",
            Self::Route { .. } => "tessera.registry.route_failed",
            Self::Start { .. } => "tessera.registry.start_failed",
            Self::Spawn { .. } => "tessera.registry.spawn_failed",
            Self::Teardown { .. } => "tessera.registry.teardown_failed",
        }
    }
}
