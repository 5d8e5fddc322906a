use std::io;

use tessera_transport::TransportError;

use crate::codec::CodecError;

/// 一次底层操作的名称，用于拼装错误上下文与日志字段。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub message: &'static str,
}

pub(crate) const RUNTIME: OperationKind = OperationKind {
    message: "tcp runtime start",
};
pub(crate) const BIND: OperationKind = OperationKind {
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    message: "tcp write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    message: "tcp configure",
};

/// 将 IO 错误映射为传输错误；拒绝连接与地址占用映射到专用变体，其余保留原始错误链。
pub(crate) fn map_io_error(kind: OperationKind, address: &str, error: io::Error) -> TransportError {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused {
            address: address.to_owned(),
        },
        io::ErrorKind::AddrInUse => TransportError::AddressInUse {
            address: address.to_owned(),
        },
        _ => TransportError::Io {
            op: kind.message,
            address: address.to_owned(),
            source: error,
        },
    }
}

/// 构造超时错误。
pub(crate) fn timeout_error(kind: OperationKind, address: &str) -> TransportError {
    TransportError::Io {
        op: kind.message,
        address: address.to_owned(),
        source: io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", kind.message)),
    }
}

pub(crate) fn protocol_error(address: &str, error: &CodecError) -> TransportError {
    TransportError::Protocol {
        address: address.to_owned(),
        detail: error.to_string(),
    }
}
