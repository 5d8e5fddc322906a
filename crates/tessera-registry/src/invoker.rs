//! 远程调用器契约、调用器句柄与基于传输层的默认实现。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tessera_core::{Envelope, InstanceId, NodeId};
use tessera_transport::{Socket, Transport, recv_timeout};

use crate::error::InvokerError;

/// 对单个节点发起远程调用的通道。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `start` 连接到 [`crate::InstanceConnection::open_route_to_node`] 给出的地址，注册表保证
///     每个调用器至多成功调用一次；
///   - `stop` 释放连接，应当幂等；
///   - `send`/`recv_timeout` 承载调用本身，负载格式由调用方决定；
/// - **风险 (Trade-offs)**：实例断开后注册表会停止调用器，但不会撤回调用方手中的句柄，
///   持有旧句柄的调用方会从 `send`/`recv_timeout` 观察到传输错误。
pub trait RemoteInvoker: Send + Sync + fmt::Debug {
    /// # Errors
    /// 重复启动或无法连接时返回 [`InvokerError`]。
    fn start(&self, address: &str) -> Result<(), InvokerError>;

    /// # Errors
    /// 关闭底层连接失败时返回 [`InvokerError::Stop`]。
    fn stop(&self) -> Result<(), InvokerError>;

    /// # Errors
    /// 未启动或传输失败。
    fn send(&self, envelope: Envelope) -> Result<(), InvokerError>;

    /// # Errors
    /// 未启动或传输失败。
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>, InvokerError>;
}

/// 为节点创建尚未启动的调用器。
pub trait RemoteInvokerFactory: Send + Sync {
    fn create(&self, node: &NodeId) -> Arc<dyn RemoteInvoker>;
}

impl<F> RemoteInvokerFactory for F
where
    F: Fn(&NodeId) -> Arc<dyn RemoteInvoker> + Send + Sync,
{
    fn create(&self, node: &NodeId) -> Arc<dyn RemoteInvoker> {
        self(node)
    }
}

/// 注册表交给调用方的已启动调用器。克隆共享同一个底层调用器。
#[derive(Clone)]
pub struct Invoker {
    node: NodeId,
    address: Arc<str>,
    remote: Arc<dyn RemoteInvoker>,
}

impl Invoker {
    pub(crate) fn new(node: NodeId, address: Arc<str>, remote: Arc<dyn RemoteInvoker>) -> Self {
        Self {
            node,
            address,
            remote,
        }
    }

    #[must_use]
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    #[must_use]
    pub fn instance(&self) -> InstanceId {
        self.node.instance()
    }

    /// 调用器启动时连接的地址。
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn remote(&self) -> &Arc<dyn RemoteInvoker> {
        &self.remote
    }

    /// 两个句柄是否指向同一个底层调用器。
    #[must_use]
    pub fn same_invoker(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.remote), Arc::as_ptr(&other.remote))
    }

    /// # Errors
    /// 见 [`RemoteInvoker::send`]。
    pub fn send(&self, envelope: Envelope) -> Result<(), InvokerError> {
        self.remote.send(envelope)
    }

    /// # Errors
    /// 见 [`RemoteInvoker::recv_timeout`]。
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>, InvokerError> {
        self.remote.recv_timeout(timeout)
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("node", &format_args!("{}", self.node))
            .field("address", &self.address)
            .finish()
    }
}

/// 通过 [`Transport`] 连接节点地址的调用器。
///
/// 收发共用一把锁：`recv_timeout` 等待期间同一调用器上的 `send` 会被阻塞，
/// 需要并发收发的调用方应向注册表申请多个调用器或自行拆分请求。
pub struct TransportInvoker {
    transport: Arc<dyn Transport>,
    connection: Mutex<Option<Box<dyn Socket>>>,
}

impl fmt::Debug for TransportInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self
            .connection
            .try_lock()
            .and_then(|slot| slot.as_ref().map(|socket| socket.address().to_owned()));
        f.debug_struct("TransportInvoker")
            .field("transport", &self.transport.scheme())
            .field("address", &address)
            .finish()
    }
}

impl TransportInvoker {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            connection: Mutex::new(None),
        }
    }

    /// 为每个节点创建 [`TransportInvoker`] 的工厂。
    pub fn factory(transport: Arc<dyn Transport>) -> impl RemoteInvokerFactory {
        move |_: &NodeId| -> Arc<dyn RemoteInvoker> {
            Arc::new(Self::new(Arc::clone(&transport)))
        }
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.connection.lock().is_some()
    }
}

impl RemoteInvoker for TransportInvoker {
    fn start(&self, address: &str) -> Result<(), InvokerError> {
        let mut slot = self.connection.lock();
        if let Some(existing) = slot.as_ref() {
            return Err(InvokerError::AlreadyStarted {
                address: existing.address().to_owned(),
            });
        }
        let socket = self
            .transport
            .connect(address)
            .map_err(|source| InvokerError::Connect {
                address: address.to_owned(),
                source,
            })?;
        tracing::debug!(address, "transport invoker connected");
        *slot = Some(socket);
        Ok(())
    }

    fn stop(&self) -> Result<(), InvokerError> {
        let Some(mut socket) = self.connection.lock().take() else {
            return Ok(());
        };
        let address = socket.address().to_owned();
        socket
            .close()
            .map_err(|source| InvokerError::Stop { address, source })
    }

    fn send(&self, envelope: Envelope) -> Result<(), InvokerError> {
        let mut slot = self.connection.lock();
        let socket = slot.as_mut().ok_or(InvokerError::NotStarted)?;
        socket.send(envelope)?;
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>, InvokerError> {
        let mut slot = self.connection.lock();
        let socket = slot.as_mut().ok_or(InvokerError::NotStarted)?;
        Ok(recv_timeout(socket.as_mut(), timeout)?)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tessera_transport::InprocTransport;

    use super::*;

    #[test]
    fn transport_invoker_requires_start_and_stops_idempotently() {
        let transport = InprocTransport::new();
        let mut worker = transport.bind("inproc://node").expect("绑定节点端点");
        let invoker = TransportInvoker::new(Arc::new(transport.clone()));

        assert!(matches!(
            invoker.send(Envelope::new()),
            Err(InvokerError::NotStarted)
        ));
        invoker.start("inproc://node").expect("启动");
        assert!(invoker.is_started());
        assert!(matches!(
            invoker.start("inproc://node"),
            Err(InvokerError::AlreadyStarted { .. })
        ));

        invoker
            .send(Envelope::from_frames([Bytes::from_static(b"call")]))
            .expect("发送");
        let request = recv_timeout(worker.as_mut(), Duration::from_secs(2))
            .expect("接收不应失败")
            .expect("节点应收到调用");
        assert_eq!(request.len(), 2);

        invoker.stop().expect("停止");
        invoker.stop().expect("重复停止是幂等的");
        assert!(!invoker.is_started());
        assert_eq!(worker.peer_count(), 0, "停止后连接应被释放");
    }

    #[test]
    fn start_against_unbound_address_fails() {
        let invoker = TransportInvoker::new(Arc::new(InprocTransport::new()));
        let err = invoker.start("inproc://nowhere").expect_err("地址未绑定");
        assert_eq!(err.code(), "tessera.invoker.connect_failed");
        assert!(!invoker.is_started());
    }
}
