//! 实例连接契约与进程内实现。
//!
//! # 教案式说明
//! - **意图 (Why)**：注册表不关心集群成员如何被发现，只依赖“枚举活跃连接 + 订阅连接/断开事件 +
//!   向某个实例询问节点地址”这组最小契约；
//! - **契约 (What)**：
//!   - [`InstanceConnection`] 描述一个已连接的实例：标识、元数据快照、为节点打开路由；
//!   - [`InstanceConnectionService`] 枚举活跃连接并分发事件，订阅以 [`Subscription`] 句柄表示，
//!     句柄释放或显式 `unsubscribe` 后不再收到回调；
//!   - [`MemoryConnectionService`] 与 [`MemoryInstance`] 是单进程部署与测试使用的实现；
//! - **风险 (Trade-offs)**：进程内实现同步地在调用 `connect`/`disconnect` 的线程上执行回调，
//!   回调内不得再调用同一服务的 `connect`/`disconnect`。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tessera_core::{InstanceId, NodeId, RouteIdentity, TenantId};

use crate::error::ConnectionError;

/// 实例在某一时刻宣告的承载情况。
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceMetadata {
    pub instance_id: InstanceId,
    pub node_ids: BTreeSet<NodeId>,
    /// 越小越空闲；没有约定取值范围，只用于相互比较。
    pub load: f64,
}

/// 到一个集群实例的连接。
pub trait InstanceConnection: Send + Sync + fmt::Debug {
    fn instance_id(&self) -> InstanceId;

    /// 读取实例当前的元数据。
    ///
    /// # Errors
    /// 实例不可达或已断开时返回 [`ConnectionError`]。
    fn metadata(&self) -> Result<InstanceMetadata, ConnectionError>;

    /// 为节点打开一条可路由地址，调用器将连接到该地址。
    ///
    /// # Errors
    /// 实例不承载该节点或无法建立路由时返回 [`ConnectionError::Route`]。
    fn open_route_to_node(&self, node: &NodeId) -> Result<String, ConnectionError>;
}

/// 连接/断开事件回调。
pub type ConnectionListener = Arc<dyn Fn(&Arc<dyn InstanceConnection>) + Send + Sync>;

/// 集群成员服务。
pub trait InstanceConnectionService: Send + Sync {
    fn active_connections(&self) -> Vec<Arc<dyn InstanceConnection>>;

    fn subscribe_to_connect(&self, listener: ConnectionListener) -> Subscription;

    fn subscribe_to_disconnect(&self, listener: ConnectionListener) -> Subscription;
}

/// 事件订阅句柄；释放即退订。
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

#[derive(Default)]
struct Listeners {
    next: AtomicU64,
    entries: Mutex<Vec<(u64, ConnectionListener)>>,
}

impl Listeners {
    fn add(&self, listener: ConnectionListener) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        self.entries.lock().retain(|(existing, _)| *existing != id);
    }

    fn notify(&self, connection: &Arc<dyn InstanceConnection>) {
        let snapshot: Vec<ConnectionListener> = self
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(connection);
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[derive(Default)]
struct ServiceInner {
    connections: Mutex<BTreeMap<InstanceId, Arc<dyn InstanceConnection>>>,
    connect: Listeners,
    disconnect: Listeners,
}

/// 进程内的集群成员服务。克隆共享同一份成员表。
#[derive(Clone, Default)]
pub struct MemoryConnectionService {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for MemoryConnectionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnectionService")
            .field("connections", &self.inner.connections.lock().len())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl MemoryConnectionService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入一个实例并通知连接订阅者。同一实例已存在时替换旧连接。
    pub fn connect(&self, connection: Arc<dyn InstanceConnection>) {
        let instance = connection.instance_id();
        self.inner
            .connections
            .lock()
            .insert(instance, Arc::clone(&connection));
        tracing::debug!(%instance, "instance connected");
        self.inner.connect.notify(&connection);
    }

    /// 移除一个实例并通知断开订阅者；实例不存在时返回 `false`。
    pub fn disconnect(&self, instance: InstanceId) -> bool {
        let removed = self.inner.connections.lock().remove(&instance);
        match removed {
            Some(connection) => {
                tracing::debug!(%instance, "instance disconnected");
                self.inner.disconnect.notify(&connection);
                true
            }
            None => false,
        }
    }

    /// 当前订阅者总数（连接 + 断开）。
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.connect.len() + self.inner.disconnect.len()
    }

    fn subscribe(
        &self,
        select: fn(&ServiceInner) -> &Listeners,
        listener: ConnectionListener,
    ) -> Subscription {
        let id = select(&self.inner).add(listener);
        let inner: Weak<ServiceInner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                select(&inner).remove(id);
            }
        })
    }
}

impl InstanceConnectionService for MemoryConnectionService {
    fn active_connections(&self) -> Vec<Arc<dyn InstanceConnection>> {
        self.inner.connections.lock().values().cloned().collect()
    }

    fn subscribe_to_connect(&self, listener: ConnectionListener) -> Subscription {
        self.subscribe(|inner| &inner.connect, listener)
    }

    fn subscribe_to_disconnect(&self, listener: ConnectionListener) -> Subscription {
        self.subscribe(|inner| &inner.disconnect, listener)
    }
}

#[derive(Debug)]
struct InstanceState {
    nodes: BTreeSet<NodeId>,
    load: f64,
    reachable: bool,
}

/// 进程内实例：节点地址由 [`RouteIdentity`] 按租户推导。
///
/// 承载集合与负载可随时修改，下次读取元数据即可见；`set_reachable(false)` 让元数据读取失败，
/// 用于模拟失联实例。
#[derive(Debug)]
pub struct MemoryInstance {
    instance_id: InstanceId,
    identity: RouteIdentity,
    state: RwLock<InstanceState>,
    routes_opened: AtomicUsize,
}

impl MemoryInstance {
    #[must_use]
    pub fn new(instance_id: InstanceId, identity: RouteIdentity) -> Self {
        Self {
            instance_id,
            identity,
            state: RwLock::new(InstanceState {
                nodes: BTreeSet::new(),
                load: 0.0,
                reachable: true,
            }),
            routes_opened: AtomicUsize::new(0),
        }
    }

    /// 宣告承载某租户，返回对应节点。
    pub fn host(&self, tenant: TenantId) -> NodeId {
        let node = NodeId::new(self.instance_id, tenant);
        self.state.write().nodes.insert(node.clone());
        node
    }

    /// 撤销承载；节点原本不存在时返回 `false`。
    pub fn evict(&self, node: &NodeId) -> bool {
        self.state.write().nodes.remove(node)
    }

    pub fn set_load(&self, load: f64) {
        self.state.write().load = load;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.write().reachable = reachable;
    }

    /// 累计成功打开的路由数。
    #[must_use]
    pub fn routes_opened(&self) -> usize {
        self.routes_opened.load(Ordering::Acquire)
    }
}

impl InstanceConnection for MemoryInstance {
    fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    fn metadata(&self) -> Result<InstanceMetadata, ConnectionError> {
        let state = self.state.read();
        if !state.reachable {
            return Err(ConnectionError::Metadata {
                instance: self.instance_id,
                detail: "instance does not respond".to_owned(),
            });
        }
        Ok(InstanceMetadata {
            instance_id: self.instance_id,
            node_ids: state.nodes.clone(),
            load: state.load,
        })
    }

    fn open_route_to_node(&self, node: &NodeId) -> Result<String, ConnectionError> {
        if !self.state.read().nodes.contains(node) {
            return Err(ConnectionError::Route {
                node: node.clone(),
                detail: "node is not hosted by this instance".to_owned(),
            });
        }
        self.routes_opened.fetch_add(1, Ordering::AcqRel);
        Ok(self.identity.address_for_tenant(node.tenant()).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: u128) -> Arc<MemoryInstance> {
        Arc::new(MemoryInstance::new(
            InstanceId::from_u128(id),
            RouteIdentity::default(),
        ))
    }

    #[test]
    fn subscription_drop_stops_notifications() {
        let service = MemoryConnectionService::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let subscription = service.subscribe_to_connect(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        service.connect(instance(1));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(service.listener_count(), 1);

        drop(subscription);
        service.connect(instance(2));
        assert_eq!(seen.load(Ordering::SeqCst), 1, "退订后不应再收到回调");
        assert_eq!(service.listener_count(), 0);
        assert_eq!(service.active_connections().len(), 2);
    }

    #[test]
    fn disconnect_notifies_only_known_instances() {
        let service = MemoryConnectionService::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let subscription = service.subscribe_to_disconnect(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        service.connect(instance(7));

        assert!(service.disconnect(InstanceId::from_u128(7)));
        assert!(!service.disconnect(InstanceId::from_u128(7)));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        subscription.unsubscribe();
        assert_eq!(service.listener_count(), 0);
    }

    #[test]
    fn memory_instance_routes_only_hosted_nodes() {
        let instance = instance(3);
        let node = instance.host(TenantId::from("acme"));
        let address = instance.open_route_to_node(&node).expect("承载的节点可以打开路由");
        assert_eq!(
            address,
            RouteIdentity::default()
                .address_for_tenant(&TenantId::from("acme"))
                .to_string()
        );
        assert_eq!(instance.routes_opened(), 1);

        assert!(instance.evict(&node));
        let err = instance
            .open_route_to_node(&node)
            .expect_err("撤销后不能再打开路由");
        assert_eq!(err.code(), "tessera.connection.no_route");

        instance.set_reachable(false);
        assert!(matches!(
            instance.metadata(),
            Err(ConnectionError::Metadata { .. })
        ));
    }
}
