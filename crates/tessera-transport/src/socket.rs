//! 套接字与传输契约。

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tessera_core::Envelope;

use crate::error::TransportError;
use crate::poll::{Poller, Source};

/// 单线程拥有的多帧套接字。
///
/// # 教案式说明
/// - **意图 (Why)**：反应器只面向这组最小操作编程，进程内与 TCP 两种传输可以互换；
/// - **契约 (What)**：
///   - `try_recv` 非阻塞：无数据返回 `Ok(None)`，连接失效返回错误；
///   - 关闭前已进入接收缓冲的信封仍可读出，之后才报告错误；
///   - `close` 幂等，关闭后 `send` 返回 [`TransportError::Closed`]；
/// - **风险 (Trade-offs)**：`send` 不阻塞也不做背压，缓冲增长由上层流量决定。
pub trait Socket: Source + Send {
    /// 绑定或连接时使用的地址。
    fn address(&self) -> &str;

    /// 非阻塞接收一个信封。
    ///
    /// # Errors
    /// 连接或端点失效后返回 [`TransportError`]。
    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError>;

    /// 发送一个信封。
    ///
    /// # Errors
    /// 绑定端目标身份不存在时返回 [`TransportError::HostUnreachable`]，
    /// 连接端对端失效时返回 [`TransportError::Disconnected`]。
    fn send(&mut self, envelope: Envelope) -> Result<(), TransportError>;

    /// 关闭套接字并释放底层资源。
    ///
    /// # Errors
    /// 底层资源释放失败时返回错误；无论成功与否，套接字此后均视为已关闭。
    fn close(&mut self) -> Result<(), TransportError>;
}

/// 绑定端（对外端点）。
pub trait BoundSocket: Socket {
    /// 关闭身份为 `identity` 的对端连接，返回该对端此前是否存在。
    ///
    /// # Errors
    /// 底层关闭失败时返回错误。
    fn disconnect_peer(&mut self, identity: &[u8]) -> Result<bool, TransportError>;

    /// 当前已连接的对端数量。
    fn peer_count(&self) -> usize;
}

/// 传输工厂：按地址绑定或连接。
pub trait Transport: Send + Sync + fmt::Debug {
    /// 地址 scheme，例如 `inproc`、`tcp`。
    fn scheme(&self) -> &str;

    /// 绑定对外端点。
    ///
    /// # Errors
    /// 地址非法、已被占用或底层绑定失败时返回错误。
    fn bind(&self, address: &str) -> Result<Box<dyn BoundSocket>, TransportError>;

    /// 连接到已绑定的端点。
    ///
    /// # Errors
    /// 地址非法、无人绑定或底层连接失败时返回错误。
    fn connect(&self, address: &str) -> Result<Box<dyn Socket>, TransportError>;
}

/// 拆分 `<scheme>://<rest>`。
///
/// # Errors
/// 缺少 `://` 或 scheme 为空时返回 [`TransportError::InvalidAddress`]。
pub fn split_scheme(address: &str) -> Result<(&str, &str), TransportError> {
    match address.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() => Ok((scheme, rest)),
        _ => Err(TransportError::InvalidAddress {
            address: address.to_owned(),
            reason: "expected `<scheme>://<endpoint>`",
        }),
    }
}

/// 按 scheme 分派的传输集合。
///
/// 第一个加入的传输决定 [`Transport::scheme`] 的返回值，即路由器为租户端点生成地址时的默认 scheme。
#[derive(Clone, Debug, Default)]
pub struct TransportSet {
    transports: Vec<Arc<dyn Transport>>,
}

impl TransportSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports
            .retain(|existing| existing.scheme() != transport.scheme());
        self.transports.push(transport);
        self
    }

    fn resolve(&self, address: &str) -> Result<&Arc<dyn Transport>, TransportError> {
        let (scheme, _) = split_scheme(address)?;
        self.transports
            .iter()
            .find(|transport| transport.scheme() == scheme)
            .ok_or_else(|| TransportError::UnsupportedScheme {
                address: address.to_owned(),
            })
    }
}

impl Transport for TransportSet {
    fn scheme(&self) -> &str {
        self.transports
            .first()
            .map_or("", |transport| transport.scheme())
    }

    fn bind(&self, address: &str) -> Result<Box<dyn BoundSocket>, TransportError> {
        self.resolve(address)?.bind(address)
    }

    fn connect(&self, address: &str) -> Result<Box<dyn Socket>, TransportError> {
        self.resolve(address)?.connect(address)
    }
}

/// 阻塞等待一个信封，最多 `timeout`。
///
/// 面向不运行反应器的调用方（客户端、租户工作端、测试）。调用会把套接字挂到一个临时轮询器上，
/// 因此不能用于已注册到其他轮询器的套接字。
///
/// # Errors
/// 套接字失效时返回对应的 [`TransportError`]。
pub fn recv_timeout<S>(socket: &mut S, timeout: Duration) -> Result<Option<Envelope>, TransportError>
where
    S: Socket + ?Sized,
{
    if let Some(envelope) = socket.try_recv()? {
        return Ok(Some(envelope));
    }
    let deadline = Instant::now() + timeout;
    let mut poller = Poller::new();
    poller.register(socket);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        if !poller.poll(remaining).is_empty() {
            if let Some(envelope) = socket.try_recv()? {
                return Ok(Some(envelope));
            }
        }
    }
}
