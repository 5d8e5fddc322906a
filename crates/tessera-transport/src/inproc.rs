//! 进程内传输。
//!
//! # 教案式说明
//! - **意图 (Why)**：同一进程内的路由器与租户工作端之间不需要经过内核网络栈，
//!   端点表加信箱即可提供与网络传输相同的多帧语义；
//! - **契约 (What)**：
//!   - 地址形如 `inproc://<name>`，同名地址只能绑定一次；
//!   - 连接到尚未绑定的地址立即失败（[`TransportError::ConnectionRefused`]）；
//!   - 绑定端关闭时，所有已连接对端的接收信箱同步关闭，对端在读完缓冲后观察到断开；
//! - **执行逻辑 (How)**：端点表为 `DashMap<String, Arc<Endpoint>>`；每个连接对端分配一个 8 字节身份，
//!   绑定端接收时把身份作为首帧压入信封；
//! - **风险 (Trade-offs)**：信箱无上限，慢消费者会让内存持续增长。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tessera_core::Envelope;

use crate::error::TransportError;
use crate::mailbox::{CloseReason, Mailbox};
use crate::poll::{Source, Waker};
use crate::socket::{BoundSocket, Socket, Transport, split_scheme};

pub const INPROC_SCHEME: &str = "inproc";

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

#[derive(Default)]
struct Hub {
    endpoints: DashMap<String, Arc<Endpoint>>,
    next_peer: AtomicU64,
}

struct Endpoint {
    inbox: Mailbox<(PeerId, Envelope)>,
    peers: Mutex<HashMap<PeerId, Arc<Mailbox<Envelope>>>>,
}

impl Endpoint {
    fn shut(&self, reason: CloseReason) {
        self.inbox.close(reason);
        let peers: Vec<_> = self.peers.lock().drain().map(|(_, mailbox)| mailbox).collect();
        for mailbox in peers {
            mailbox.close(CloseReason::Remote);
        }
    }
}

/// 进程内传输工厂。克隆共享同一张端点表。
#[derive(Clone, Default)]
pub struct InprocTransport {
    hub: Arc<Hub>,
}

impl std::fmt::Debug for InprocTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InprocTransport")
            .field("endpoints", &self.hub.endpoints.len())
            .finish()
    }
}

impl InprocTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 地址当前是否已被绑定。
    #[must_use]
    pub fn is_bound(&self, address: &str) -> bool {
        self.hub.endpoints.contains_key(address)
    }

    /// 以“传输故障”方式强制拆除一个已绑定端点。
    ///
    /// 绑定端在读完缓冲后观察到错误，所有已连接对端观察到断开；用于运维摘除与故障演练。
    pub fn sever(&self, address: &str) -> bool {
        match self.hub.endpoints.remove(address) {
            Some((_, endpoint)) => {
                endpoint.shut(CloseReason::Failed);
                tracing::warn!(address, "inproc endpoint severed");
                true
            }
            None => false,
        }
    }

    fn validate(address: &str) -> Result<(), TransportError> {
        let (scheme, name) = split_scheme(address)?;
        if scheme != INPROC_SCHEME {
            return Err(TransportError::UnsupportedScheme {
                address: address.to_owned(),
            });
        }
        if name.is_empty() {
            return Err(TransportError::InvalidAddress {
                address: address.to_owned(),
                reason: "endpoint name must not be empty",
            });
        }
        Ok(())
    }
}

impl Transport for InprocTransport {
    fn scheme(&self) -> &str {
        INPROC_SCHEME
    }

    fn bind(&self, address: &str) -> Result<Box<dyn BoundSocket>, TransportError> {
        Self::validate(address)?;
        let endpoint = match self.hub.endpoints.entry(address.to_owned()) {
            Entry::Occupied(_) => {
                return Err(TransportError::AddressInUse {
                    address: address.to_owned(),
                });
            }
            Entry::Vacant(slot) => {
                let endpoint = Arc::new(Endpoint {
                    inbox: Mailbox::new(),
                    peers: Mutex::new(HashMap::new()),
                });
                slot.insert(Arc::clone(&endpoint));
                endpoint
            }
        };
        tracing::debug!(address, "inproc endpoint bound");
        Ok(Box::new(InprocBound {
            address: address.to_owned(),
            hub: Arc::clone(&self.hub),
            endpoint,
            closed: false,
        }))
    }

    fn connect(&self, address: &str) -> Result<Box<dyn Socket>, TransportError> {
        Self::validate(address)?;
        let refused = || TransportError::ConnectionRefused {
            address: address.to_owned(),
        };
        let endpoint = self
            .hub
            .endpoints
            .get(address)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(refused)?;
        let peer = PeerId(self.hub.next_peer.fetch_add(1, Ordering::Relaxed));
        let inbox = Arc::new(Mailbox::new());
        {
            let mut peers = endpoint.peers.lock();
            // 与 `shut` 共用同一把锁：端点关闭后不再接纳新对端。
            if endpoint.inbox.is_closed() {
                return Err(refused());
            }
            peers.insert(peer, Arc::clone(&inbox));
        }
        Ok(Box::new(InprocConnected {
            address: address.to_owned(),
            peer,
            endpoint,
            inbox,
            closed: false,
        }))
    }
}

struct InprocBound {
    address: String,
    hub: Arc<Hub>,
    endpoint: Arc<Endpoint>,
    closed: bool,
}

impl InprocBound {
    fn closed_error(&self) -> TransportError {
        TransportError::Closed {
            address: self.address.clone(),
        }
    }
}

impl Source for InprocBound {
    fn attach(&mut self, waker: Waker) {
        self.endpoint.inbox.set_waker(waker);
    }
}

impl Socket for InprocBound {
    fn address(&self) -> &str {
        &self.address
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        if self.closed {
            return Err(self.closed_error());
        }
        match self.endpoint.inbox.try_pop() {
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
            return Err(self.closed_error());
        }
        let identity = envelope.pop_front().unwrap_or_default();
        let peer = PeerId::from_frame(&identity)
            .ok_or_else(|| TransportError::unreachable(&identity))?;
        let mailbox = self
            .endpoint
            .peers
            .lock()
            .get(&peer)
            .cloned()
            .ok_or_else(|| TransportError::unreachable(&identity))?;
        mailbox.push(envelope).map_err(|_| {
            self.endpoint.peers.lock().remove(&peer);
            TransportError::unreachable(&identity)
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.hub
            .endpoints
            .remove_if(&self.address, |_, endpoint| Arc::ptr_eq(endpoint, &self.endpoint));
        self.endpoint.shut(CloseReason::Local);
        tracing::debug!(address = %self.address, "inproc endpoint closed");
        Ok(())
    }
}

impl BoundSocket for InprocBound {
    fn disconnect_peer(&mut self, identity: &[u8]) -> Result<bool, TransportError> {
        let Some(peer) = PeerId::from_frame(identity) else {
            return Ok(false);
        };
        let removed = self.endpoint.peers.lock().remove(&peer);
        match removed {
            Some(mailbox) => {
                mailbox.close(CloseReason::Remote);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn peer_count(&self) -> usize {
        self.endpoint.peers.lock().len()
    }
}

impl Drop for InprocBound {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct InprocConnected {
    address: String,
    peer: PeerId,
    endpoint: Arc<Endpoint>,
    inbox: Arc<Mailbox<Envelope>>,
    closed: bool,
}

impl InprocConnected {
    fn disconnected(&self) -> TransportError {
        TransportError::Disconnected {
            address: self.address.clone(),
        }
    }
}

impl Source for InprocConnected {
    fn attach(&mut self, waker: Waker) {
        self.inbox.set_waker(waker);
    }
}

impl Socket for InprocConnected {
    fn address(&self) -> &str {
        &self.address
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed {
                address: self.address.clone(),
            });
        }
        self.inbox.try_pop().map_err(|_| self.disconnected())
    }

    fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed {
                address: self.address.clone(),
            });
        }
        if self.inbox.is_closed() {
            return Err(self.disconnected());
        }
        self.endpoint
            .inbox
            .push((self.peer, envelope))
            .map_err(|_| self.disconnected())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.endpoint.peers.lock().remove(&self.peer);
        self.inbox.close(CloseReason::Local);
        Ok(())
    }
}

impl Drop for InprocConnected {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
