use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use tessera_core::{Envelope, TcpSettings};
use tessera_transport::{
    BoundSocket, CloseReason, Mailbox, Socket, Source, Transport, TransportError, Waker,
    split_scheme,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::codec::{decode, encode};
use crate::error::{
    ACCEPT, BIND, CONFIGURE, CONNECT, READ, RUNTIME, WRITE, map_io_error, protocol_error,
    timeout_error,
};

pub const TCP_SCHEME: &str = "tcp";

const READ_CHUNK: usize = 8 * 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// TCP 传输工厂。
///
/// # 教案式说明
/// - **意图 (Why)**：让同步反应器透明地使用网络端点；
/// - **契约 (What)**：
///   - 绑定 `tcp://host:0` 时，返回套接字的 [`Socket::address`] 是实际监听地址；
///   - 每个连接由一个读任务与一个写任务服务，读任务把解码后的信封推入信箱，写任务消费无界通道；
///   - 连接端对端关闭或读写失败时，信箱关闭并向轮询器报告错误；
/// - **执行逻辑 (How)**：私有多线程 Tokio 运行时由所有由本工厂创建的套接字共享，最后一个持有者释放时关闭；
/// - **风险 (Trade-offs)**：写通道无界，对端读得慢时内存随之增长。
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Runtime,
    settings: TcpSettings,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl TcpTransport {
    /// 按配置启动私有 IO 运行时。
    ///
    /// # Errors
    /// 运行时线程无法创建时返回 [`TransportError::Io`]。
    pub fn new(settings: TcpSettings) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(settings.io_threads.max(1))
            .thread_name("tessera-tcp-io")
            .enable_io()
            .enable_time()
            .build()
            .map_err(|error| map_io_error(RUNTIME, TCP_SCHEME, error))?;
        Ok(Self {
            inner: Arc::new(Inner { runtime, settings }),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &TcpSettings {
        &self.inner.settings
    }

    fn endpoint(address: &str) -> Result<&str, TransportError> {
        let (scheme, endpoint) = split_scheme(address)?;
        if scheme != TCP_SCHEME {
            return Err(TransportError::UnsupportedScheme {
                address: address.to_owned(),
            });
        }
        Ok(endpoint)
    }
}

impl Transport for TcpTransport {
    fn scheme(&self) -> &str {
        TCP_SCHEME
    }

    fn bind(&self, address: &str) -> Result<Box<dyn BoundSocket>, TransportError> {
        let endpoint = Self::endpoint(address)?;
        let listener = self
            .inner
            .runtime
            .block_on(TcpListener::bind(endpoint))
            .map_err(|error| map_io_error(BIND, address, error))?;
        let local = listener
            .local_addr()
            .map_err(|error| map_io_error(BIND, address, error))?;
        let local_address = format!("{TCP_SCHEME}://{local}");

        let shared = Arc::new(BoundShared {
            address: local_address.clone(),
            inbox: Mailbox::new(),
            peers: Mutex::new(HashMap::new()),
        });
        let accept = self
            .inner
            .runtime
            .spawn(accept_loop(
                listener,
                Arc::clone(&shared),
                self.inner.settings.clone(),
            ))
            .abort_handle();
        tracing::info!(address = %local_address, "tcp endpoint bound");

        Ok(Box::new(TcpBound {
            address: local_address,
            _inner: Arc::clone(&self.inner),
            shared,
            accept,
            closed: false,
        }))
    }

    fn connect(&self, address: &str) -> Result<Box<dyn Socket>, TransportError> {
        let endpoint = Self::endpoint(address)?;
        let settings = &self.inner.settings;
        let stream = self
            .inner
            .runtime
            .block_on(async {
                tokio::time::timeout(settings.connect_timeout(), TcpStream::connect(endpoint)).await
            })
            .map_err(|_| timeout_error(CONNECT, address))?
            .map_err(|error| map_io_error(CONNECT, address, error))?;
        if let Err(error) = configure(&stream, settings, address) {
            tracing::warn!(address, %error, "tcp socket options not applied");
        }

        let inbox = Arc::new(Mailbox::new());
        let (reader, writer) = stream.into_split();
        let (outbound, queued) = mpsc::unbounded_channel();

        let reader_inbox = Arc::clone(&inbox);
        let reader_address = address.to_owned();
        let max_frame_len = settings.max_frame_len;
        let reader = self
            .inner
            .runtime
            .spawn(async move {
                let outcome = read_envelopes(reader, max_frame_len, &reader_address, |envelope| {
                    reader_inbox.push(envelope).is_ok()
                })
                .await;
                let reason = match outcome {
                    Ok(()) => CloseReason::Remote,
                    Err(error) => {
                        tracing::debug!(address = %reader_address, %error, "tcp connection read failed");
                        CloseReason::Failed
                    }
                };
                reader_inbox.close(reason);
            })
            .abort_handle();

        let writer_inbox = Arc::clone(&inbox);
        let writer_address = address.to_owned();
        self.inner.runtime.spawn(async move {
            if let Err(error) = write_envelopes(writer, queued, &writer_address).await {
                tracing::debug!(address = %writer_address, %error, "tcp connection write failed");
                writer_inbox.close(CloseReason::Failed);
            }
        });

        tracing::debug!(address, "tcp connection established");
        Ok(Box::new(TcpConnected {
            address: address.to_owned(),
            _inner: Arc::clone(&self.inner),
            inbox,
            outbound: Some(outbound),
            reader,
            closed: false,
        }))
    }
}

fn configure(stream: &TcpStream, settings: &TcpSettings, address: &str) -> Result<(), TransportError> {
    stream
        .set_nodelay(settings.nodelay)
        .map_err(|error| map_io_error(CONFIGURE, address, error))?;
    if let Some(idle) = settings.keepalive() {
        let sock = SockRef::from(stream);
        sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))
            .map_err(|error| map_io_error(CONFIGURE, address, error))?;
    }
    Ok(())
}

/// 持续解码信封并交给 `deliver`；`deliver` 返回 `false` 表示接收方已关闭，读循环随之结束。
async fn read_envelopes<R, F>(
    mut reader: R,
    max_frame_len: usize,
    address: &str,
    mut deliver: F,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
    F: FnMut(Envelope) -> bool,
{
    let mut buffer = BytesMut::with_capacity(READ_CHUNK);
    loop {
        loop {
            match decode(&mut buffer, max_frame_len) {
                Ok(Some(envelope)) => {
                    if !deliver(envelope) {
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(error) => return Err(protocol_error(address, &error)),
            }
        }
        buffer.reserve(READ_CHUNK);
        let read = reader
            .read_buf(&mut buffer)
            .await
            .map_err(|error| map_io_error(READ, address, error))?;
        if read == 0 {
            if buffer.is_empty() {
                return Ok(());
            }
            return Err(TransportError::Protocol {
                address: address.to_owned(),
                detail: "connection closed in the middle of an envelope".to_owned(),
            });
        }
    }
}

/// 消费写通道直到所有发送端释放，然后半关闭写方向。
async fn write_envelopes<W>(
    mut writer: W,
    mut queued: mpsc::UnboundedReceiver<Envelope>,
    address: &str,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::new();
    while let Some(envelope) = queued.recv().await {
        buffer.clear();
        encode(&envelope, &mut buffer).map_err(|error| protocol_error(address, &error))?;
        writer
            .write_all(&buffer)
            .await
            .map_err(|error| map_io_error(WRITE, address, error))?;
    }
    writer
        .shutdown()
        .await
        .map_err(|error| map_io_error(WRITE, address, error))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PeerId(u64);

impl PeerId {
    fn to_frame(self) -> Bytes {
        Bytes::copy_from_slice(&self.0.to_be_bytes())
    }

    fn from_frame(frame: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = frame.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

struct Peer {
    outbound: mpsc::UnboundedSender<Envelope>,
    reader: AbortHandle,
}

impl Peer {
    /// 停止读取；释放发送端后写任务刷完已排队的信封再半关闭连接。
    fn release(self) {
        self.reader.abort();
    }
}

struct BoundShared {
    address: String,
    inbox: Mailbox<(PeerId, Envelope)>,
    peers: Mutex<HashMap<PeerId, Peer>>,
}

impl BoundShared {
    fn drop_peer(&self, peer: PeerId) -> bool {
        let removed = self.peers.lock().remove(&peer);
        removed.map(Peer::release).is_some()
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<BoundShared>, settings: TcpSettings) {
    let mut next_peer = 0_u64;
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                let error = map_io_error(ACCEPT, &shared.address, error);
                tracing::warn!(address = %shared.address, %error, "tcp accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        if let Err(error) = configure(&stream, &settings, &shared.address) {
            tracing::warn!(address = %shared.address, %error, "tcp socket options not applied");
        }
        let peer = PeerId(next_peer);
        next_peer += 1;

        let (reader, writer) = stream.into_split();
        let (outbound, queued) = mpsc::unbounded_channel();

        let writer_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            if let Err(error) = write_envelopes(writer, queued, &writer_shared.address).await {
                tracing::debug!(address = %writer_shared.address, %error, "tcp peer write failed");
                writer_shared.drop_peer(peer);
            }
        });

        // 持锁启动读任务并登记对端，保证对首个请求的回复能找到身份。
        {
            let mut peers = shared.peers.lock();
            let reader_shared = Arc::clone(&shared);
            let max_frame_len = settings.max_frame_len;
            let reader = tokio::spawn(async move {
                let outcome =
                    read_envelopes(reader, max_frame_len, &reader_shared.address, |envelope| {
                        reader_shared.inbox.push((peer, envelope)).is_ok()
                    })
                    .await;
                if let Err(error) = outcome {
                    tracing::debug!(address = %reader_shared.address, %error, "tcp peer read failed");
                }
                reader_shared.peers.lock().remove(&peer);
            })
            .abort_handle();
            peers.insert(peer, Peer { outbound, reader });
        }
        tracing::debug!(address = %shared.address, %remote, "tcp peer accepted");
    }
}

struct TcpBound {
    address: String,
    _inner: Arc<Inner>,
    shared: Arc<BoundShared>,
    accept: AbortHandle,
    closed: bool,
}

impl Source for TcpBound {
    fn attach(&mut self, waker: Waker) {
        self.shared.inbox.set_waker(waker);
    }
}

impl Socket for TcpBound {
    fn address(&self) -> &str {
        &self.address
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed {
                address: self.address.clone(),
            });
        }
        match self.shared.inbox.try_pop() {
            Ok(Some((peer, mut envelope))) => {
                envelope.push_front(peer.to_frame());
                Ok(Some(envelope))
            }
            Ok(None) => Ok(None),
            Err(_) => Err(TransportError::Disconnected {
                address: self.address.clone(),
            }),
        }
    }

    fn send(&mut self, mut envelope: Envelope) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed {
                address: self.address.clone(),
            });
        }
        let identity = envelope.pop_front().unwrap_or_default();
        if envelope.is_empty() {
            return Err(TransportError::Protocol {
                address: self.address.clone(),
                detail: "reply carries no frames after the identity".to_owned(),
            });
        }
        let peer = PeerId::from_frame(&identity)
            .ok_or_else(|| TransportError::unreachable(&identity))?;
        let mut peers = self.shared.peers.lock();
        let delivered = peers
            .get(&peer)
            .map(|entry| entry.outbound.send(envelope).is_ok());
        match delivered {
            Some(true) => Ok(()),
            Some(false) => {
                if let Some(stale) = peers.remove(&peer) {
                    stale.release();
                }
                Err(TransportError::unreachable(&identity))
            }
            None => Err(TransportError::unreachable(&identity)),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.accept.abort();
        self.shared.inbox.close(CloseReason::Local);
        let peers: Vec<Peer> = self.shared.peers.lock().drain().map(|(_, peer)| peer).collect();
        for peer in peers {
            peer.release();
        }
        tracing::info!(address = %self.address, "tcp endpoint closed");
        Ok(())
    }
}

impl BoundSocket for TcpBound {
    fn disconnect_peer(&mut self, identity: &[u8]) -> Result<bool, TransportError> {
        Ok(PeerId::from_frame(identity).is_some_and(|peer| self.shared.drop_peer(peer)))
    }

    fn peer_count(&self) -> usize {
        self.shared.peers.lock().len()
    }
}

impl Drop for TcpBound {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct TcpConnected {
    address: String,
    _inner: Arc<Inner>,
    inbox: Arc<Mailbox<Envelope>>,
    outbound: Option<mpsc::UnboundedSender<Envelope>>,
    reader: AbortHandle,
    closed: bool,
}

impl Source for TcpConnected {
    fn attach(&mut self, waker: Waker) {
        self.inbox.set_waker(waker);
    }
}

impl Socket for TcpConnected {
    fn address(&self) -> &str {
        &self.address
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed {
                address: self.address.clone(),
            });
        }
        self.inbox
            .try_pop()
            .map_err(|_| TransportError::Disconnected {
                address: self.address.clone(),
            })
    }

    fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let Some(outbound) = self.outbound.as_ref().filter(|_| !self.closed) else {
            return Err(TransportError::Closed {
                address: self.address.clone(),
            });
        };
        if envelope.is_empty() {
            return Err(TransportError::Protocol {
                address: self.address.clone(),
                detail: "cannot send an empty envelope".to_owned(),
            });
        }
        if self.inbox.is_closed() || outbound.send(envelope).is_err() {
            return Err(TransportError::Disconnected {
                address: self.address.clone(),
            });
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.outbound = None;
        self.reader.abort();
        self.inbox.close(CloseReason::Local);
        Ok(())
    }
}

impl Drop for TcpConnected {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
