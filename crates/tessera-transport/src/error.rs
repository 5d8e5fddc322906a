use std::io;

use tessera_core::ErrorCategory;
use thiserror::Error;

/// 传输层错误。
///
/// # 教案式说明
/// - **意图 (Why)**：同一个错误类型同时服务于对外端点与内部后端连接，调用方按所处位置与变体
///   决定影响范围：对外端点回复时的 `HostUnreachable`/`Protocol` 只涉及该条信封，其余错误意味着
///   端点本身失效；后端连接上的错误只拆除该连接；
/// - **契约 (What)**：[`TransportError::category`] 给出默认分类，[`TransportError::code`] 给出稳定错误码；
/// - **风险 (Trade-offs)**：`Io` 变体持有 `io::Error`，因此本类型不实现 `Clone`，聚合时按值移动。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no transport registered for address `{address}`")]
    UnsupportedScheme { address: String },

    #[error("invalid transport address `{address}`: {reason}")]
    InvalidAddress {
        address: String,
        reason: &'static str,
    },

    #[error("address `{address}` is already bound")]
    AddressInUse { address: String },

    #[error("connection to `{address}` refused")]
    ConnectionRefused { address: String },

    /// 绑定端发送时目标身份不存在或已断开。
    #[error("peer `{peer}` is unreachable")]
    HostUnreachable { peer: String },

    /// 对端已关闭或连接已失效。
    #[error("connection to `{address}` was lost")]
    Disconnected { address: String },

    /// 本端已关闭，不能继续收发。
    #[error("socket `{address}` is closed")]
    Closed { address: String },

    #[error("{op} failed on `{address}`")]
    Io {
        op: &'static str,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("protocol violation on `{address}`: {detail}")]
    Protocol { address: String, detail: String },
}

impl TransportError {
    #[must_use]
    pub fn unreachable(identity: &[u8]) -> Self {
        Self::HostUnreachable {
            peer: hex::encode(identity),
        }
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedScheme { .. } | Self::InvalidAddress { .. } => {
                ErrorCategory::Malformed
            }
            Self::AddressInUse { .. } => ErrorCategory::Fatal,
            Self::Closed { .. } => ErrorCategory::State,
            Self::ConnectionRefused { .. }
            | Self::HostUnreachable { .. }
            | Self::Disconnected { .. }
            | Self::Io { .. }
            | Self::Protocol { .. } => ErrorCategory::Recoverable,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedScheme { .. } => "tessera.transport.unsupported_scheme",
            Self::InvalidAddress { .. } => "tessera.transport.invalid_address",
            Self::AddressInUse { .. } => "tessera.transport.address_in_use",
            Self::ConnectionRefused { .. } => "tessera.transport.connection_refused",
            Self::HostUnreachable { .. } => "tessera.transport.host_unreachable",
            Self::Disconnected { .. } => "tessera.transport.disconnected",
            Self::Closed { .. } => "tessera.transport.closed",
            Self::Io { .. } => "tessera.transport.io_failed",
            Self::Protocol { .. } => "tessera.transport.protocol_violation",
        }
    }
}
