//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为标识、信封与配置三类纯数据契约提供集中的错误定义；
//! - 通过 [`ErrorCategory`] 给出跨 crate 一致的分类，路由器与注册表据此决定“本地处理”还是“向上冒泡”。
//!
//! ## 设计要求（What）
//! - 所有错误均派生 `thiserror::Error`，可直接 `?` 传播；
//! - 每个变体提供稳定的点分错误码（`tessera.<域>.<原因>`），日志与告警以错误码为维度聚合。

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 跨 crate 共享的错误分类。
///
/// # 教案式说明
/// - **意图 (Why)**：路由反应器需要区分“关闭单个连接即可”“拆除单条后端路由即可”与“整个循环必须退出”；
///   注册表需要区分“节点不存在”与“生命周期误用”。
/// - **契约 (What)**：
///   - `Malformed`：输入帧结构非法，只影响发送方；
///   - `Recoverable`：单条连接/路由的传输故障，局部拆除后可自愈；
///   - `Fatal`：对外端点失效，反应器终止并要求显式重启；
///   - `NotFound`：查询对象不存在；
///   - `State`：重复启动/停止等生命周期误用，不破坏内部状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    Malformed,
    Recoverable,
    Fatal,
    NotFound,
    State,
}

impl ErrorCategory {
    /// 分类的小写名称，用作结构化日志字段值。
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Recoverable => "recoverable",
            Self::Fatal => "fatal",
            Self::NotFound => "not_found",
            Self::State => "state",
        }
    }
}

/// 信封结构错误。
///
/// 所有变体都归类为 [`ErrorCategory::Malformed`]：调用方应关闭发送该信封的连接，而不是终止整个反应器。
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum EnvelopeError {
    /// 信封中不存在空分隔帧。
    #[error("envelope has no empty delimiter frame ({frames} frames)")]
    MissingDelimiter { frames: usize },

    /// 分隔帧之后没有路由标识帧。
    #[error("envelope has no route identifier frame after the delimiter at index {delimiter}")]
    MissingRouteFrame { delimiter: usize },

    /// 路由标识帧长度不是 16 字节。
    #[error("route identifier frame must be 16 bytes, got {len}")]
    InvalidRouteFrame { len: usize },
}

impl EnvelopeError {
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Malformed
    }

    /// 稳定错误码。
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingDelimiter { .. } => "tessera.envelope.missing_delimiter",
            Self::MissingRouteFrame { .. } => "tessera.envelope.missing_route_frame",
            Self::InvalidRouteFrame { .. } => "tessera.envelope.invalid_route_frame",
        }
    }
}

/// 标识构造与解析错误。
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum IdentityError {
    /// 租户标识缺失。
    ///
    /// - **意图 (Why)**：外部边界（配置、控制命令）可能给出“空值”租户，必须在进入路由层之前拒绝；
    /// - **契约 (What)**：空字符串不算缺失，只有 `None` 才触发该错误。
    #[error("tenant identifier is required")]
    MissingTenant,

    /// 字符串不是规范的 8-4-4-4-12 形式的路由标识。
    #[error("`{input}` is not a canonical route identifier")]
    InvalidRouteId { input: String },

    /// 字符串不是规范的 8-4-4-4-12 形式的实例标识。
    #[error("`{input}` is not a canonical instance identifier")]
    InvalidInstanceId { input: String },

    /// 字符串不符合 `<scheme>://route-<id>` 形式。
    #[error("`{input}` is not a route address")]
    InvalidRouteAddress { input: String },

    /// 节点标识不符合 `<instance>+<tenant>` 形式。
    #[error("`{input}` is not a node identifier")]
    InvalidNodeId { input: String },
}

impl IdentityError {
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Malformed
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingTenant => "tessera.identity.missing_tenant",
            Self::InvalidRouteId { .. } => "tessera.identity.invalid_route_id",
            Self::InvalidInstanceId { .. } => "tessera.identity.invalid_instance_id",
            Self::InvalidRouteAddress { .. } => "tessera.identity.invalid_route_address",
            Self::InvalidNodeId { .. } => "tessera.identity.invalid_node_id",
        }
    }
}

/// 配置加载错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration")]
    Parse(#[from] toml::de::Error),

    /// 字段取值越界，例如轮询间隔为 0。
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Read { .. } => "tessera.config.read_failed",
            Self::Parse(_) => "tessera.config.parse_failed",
            Self::Invalid { .. } => "tessera.config.invalid_value",
        }
    }
}
