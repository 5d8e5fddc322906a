//! 调用表：节点条目、租户索引与实例记录。
//!
//! # 教案式说明
//! - **意图 (Why)**：调用方线程高频读取、成员事件低频写入；读取路径不能被其他租户的写入阻塞；
//! - **契约 (What)**：
//!   - 三张 `DashMap` 分别以节点、租户、实例为键，读取只持有分片级读锁；
//!   - 所有写入方法都要求调用方持有注册表的成员锁，因此三张表之间的一致性无需额外同步；
//!   - 被移除的条目由调用方在释放成员锁之后退役，退役会停止已启动的调用器；
//! - **执行逻辑 (How)**：实例记录用 `ArcSwap` 保存最近一次元数据，条目通过共享的实例记录读取负载，
//!   刷新负载只需替换一个指针。

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tessera_core::{InstanceId, NodeId, TenantId};

use crate::connection::{InstanceConnection, InstanceMetadata};
use crate::error::{InvokerError, RegistryError};
use crate::invoker::{Invoker, RemoteInvokerFactory};

/// 一个已连接实例的记录。
pub(crate) struct InstanceRecord {
    pub(crate) connection: Arc<dyn InstanceConnection>,
    pub(crate) metadata: ArcSwap<InstanceMetadata>,
}

impl InstanceRecord {
    pub(crate) fn load(&self) -> f64 {
        self.metadata.load().load
    }
}

enum StartState {
    Idle,
    Started(Invoker),
    /// 条目已从表中移除；此后的启动请求按“节点不存在”处理。
    Retired,
}

/// 单个节点的调用器条目。
pub(crate) struct InvokerEntry {
    node: NodeId,
    instance: Arc<InstanceRecord>,
    start: Mutex<StartState>,
}

impl InvokerEntry {
    fn new(node: NodeId, instance: Arc<InstanceRecord>) -> Self {
        Self {
            node,
            instance,
            start: Mutex::new(StartState::Idle),
        }
    }

    pub(crate) fn node(&self) -> &NodeId {
        &self.node
    }

    pub(crate) fn load(&self) -> f64 {
        self.instance.load()
    }

    /// 已启动时返回调用器地址。
    pub(crate) fn started_address(&self) -> Option<String> {
        match &*self.start.lock() {
            StartState::Started(invoker) => Some(invoker.address().to_owned()),
            StartState::Idle | StartState::Retired => None,
        }
    }

    /// 返回已启动的调用器，必要时先打开路由并启动。
    ///
    /// 启动过程持有条目锁：同一条目的并发调用方等待第一个调用方的结果，
    /// 失败时条目保持 `Idle`，下一次调用重新尝试。
    pub(crate) fn ensure_started(
        &self,
        factory: &dyn RemoteInvokerFactory,
    ) -> Result<Invoker, RegistryError> {
        let mut state = self.start.lock();
        match &*state {
            StartState::Started(invoker) => return Ok(invoker.clone()),
            StartState::Retired => {
                return Err(RegistryError::NodeNotFound {
                    node: self.node.clone(),
                });
            }
            StartState::Idle => {}
        }

        let address = self
            .instance
            .connection
            .open_route_to_node(&self.node)
            .map_err(|source| RegistryError::Route {
                node: self.node.clone(),
                source,
            })?;
        let remote = factory.create(&self.node);
        tracing::info!(node = %self.node, %address, "connecting to node");
        remote
            .start(&address)
            .map_err(|source| RegistryError::Start {
                node: self.node.clone(),
                source,
            })?;
        let invoker = Invoker::new(self.node.clone(), address.into(), remote);
        *state = StartState::Started(invoker.clone());
        Ok(invoker)
    }

    /// 标记条目退役，已启动时停止调用器。
    pub(crate) fn retire(&self) -> Result<(), InvokerError> {
        let previous = std::mem::replace(&mut *self.start.lock(), StartState::Retired);
        match previous {
            StartState::Started(invoker) => {
                tracing::info!(node = %self.node, address = invoker.address(), "cleaning up invoker");
                invoker.remote().stop()
            }
            StartState::Idle | StartState::Retired => Ok(()),
        }
    }
}

/// 一次成员变更的结果。
#[derive(Default)]
pub(crate) struct Changes {
    pub(crate) added: usize,
    pub(crate) removed: Vec<Arc<InvokerEntry>>,
}

impl Changes {
    pub(crate) fn merge(&mut self, other: Self) {
        self.added += other.added;
        self.removed.extend(other.removed);
    }
}

#[derive(Default)]
pub(crate) struct InvokerTable {
    nodes: DashMap<NodeId, Arc<InvokerEntry>>,
    tenants: DashMap<TenantId, BTreeSet<NodeId>>,
    instances: DashMap<InstanceId, Arc<InstanceRecord>>,
}

impl InvokerTable {
    pub(crate) fn node(&self, node: &NodeId) -> Option<Arc<InvokerEntry>> {
        self.nodes.get(node).map(|entry| Arc::clone(entry.value()))
    }

    /// 承载租户的全部条目，顺序未定义。
    pub(crate) fn tenant(&self, tenant: &TenantId) -> Vec<Arc<InvokerEntry>> {
        let nodes: Vec<NodeId> = match self.tenants.get(tenant) {
            Some(nodes) => nodes.iter().cloned().collect(),
            None => return Vec::new(),
        };
        nodes.iter().filter_map(|node| self.node(node)).collect()
    }

    pub(crate) fn entries(&self) -> Vec<Arc<InvokerEntry>> {
        self.nodes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub(crate) fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.iter().map(|entry| *entry.key()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// 按最新元数据登记实例：新节点插入、不再宣告的节点移除、负载更新。
    ///
    /// 同一实例换了新的连接对象时，旧连接上的条目全部移除后按新连接重建。
    /// 调用方必须持有成员锁。
    pub(crate) fn upsert_instance(
        &self,
        connection: &Arc<dyn InstanceConnection>,
        mut metadata: InstanceMetadata,
    ) -> Changes {
        let instance = connection.instance_id();
        let mut changes = Changes::default();
        metadata.node_ids.retain(|node| {
            let owned = node.instance() == instance;
            if !owned {
                tracing::warn!(%instance, node = %node, "instance advertised a node it does not own");
            }
            owned
        });

        let existing = self.instances.get(&instance).map(|record| Arc::clone(record.value()));
        let record = match existing {
            Some(record) if same_connection(&record.connection, connection) => record,
            Some(_) => {
                changes.merge(self.remove_instance(instance));
                self.insert_record(connection, &metadata)
            }
            None => self.insert_record(connection, &metadata),
        };

        let previous = record.metadata.load_full();
        for node in previous.node_ids.difference(&metadata.node_ids) {
            if let Some(entry) = self.remove_node(node) {
                changes.removed.push(entry);
            }
        }
        for node in &metadata.node_ids {
            if let Entry::Vacant(slot) = self.nodes.entry(node.clone()) {
                slot.insert(Arc::new(InvokerEntry::new(node.clone(), Arc::clone(&record))));
                self.tenants
                    .entry(node.tenant().clone())
                    .or_default()
                    .insert(node.clone());
                changes.added += 1;
            }
        }
        record.metadata.store(Arc::new(metadata));
        changes
    }

    fn insert_record(
        &self,
        connection: &Arc<dyn InstanceConnection>,
        metadata: &InstanceMetadata,
    ) -> Arc<InstanceRecord> {
        // 新记录以“未承载任何节点”的元数据起步，随后由 upsert 统一插入节点。
        let empty = InstanceMetadata {
            instance_id: metadata.instance_id,
            node_ids: BTreeSet::new(),
            load: metadata.load,
        };
        let record = Arc::new(InstanceRecord {
            connection: Arc::clone(connection),
            metadata: ArcSwap::from_pointee(empty),
        });
        self.instances
            .insert(connection.instance_id(), Arc::clone(&record));
        record
    }

    /// 移除实例及其全部条目。调用方必须持有成员锁。
    pub(crate) fn remove_instance(&self, instance: InstanceId) -> Changes {
        let mut changes = Changes::default();
        let Some((_, record)) = self.instances.remove(&instance) else {
            return changes;
        };
        let metadata = record.metadata.load_full();
        changes.removed = metadata
            .node_ids
            .iter()
            .filter_map(|node| self.remove_node(node))
            .collect();
        changes
    }

    /// 保留 `listed` 中的实例，移除其余实例。调用方必须持有成员锁。
    pub(crate) fn retain_instances(&self, listed: &HashSet<InstanceId>) -> Changes {
        let mut changes = Changes::default();
        for instance in self.instance_ids() {
            if !listed.contains(&instance) {
                changes.merge(self.remove_instance(instance));
            }
        }
        changes
    }

    /// 清空整张表。调用方必须持有成员锁。
    pub(crate) fn clear(&self) -> Vec<Arc<InvokerEntry>> {
        let entries = self.entries();
        self.nodes.clear();
        self.tenants.clear();
        self.instances.clear();
        entries
    }

    fn remove_node(&self, node: &NodeId) -> Option<Arc<InvokerEntry>> {
        let (_, entry) = self.nodes.remove(node)?;
        if let Entry::Occupied(mut nodes) = self.tenants.entry(node.tenant().clone()) {
            nodes.get_mut().remove(node);
            if nodes.get().is_empty() {
                nodes.remove();
            }
        }
        Some(entry)
    }
}

fn same_connection(left: &Arc<dyn InstanceConnection>, right: &Arc<dyn InstanceConnection>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tessera_core::{Envelope, RouteIdentity};

    use super::*;
    use crate::connection::MemoryInstance;
    use crate::invoker::RemoteInvoker;

    #[derive(Debug, Default)]
    struct CountingInvoker {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl RemoteInvoker for CountingInvoker {
        fn start(&self, _address: &str) -> Result<(), InvokerError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) -> Result<(), InvokerError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn send(&self, _envelope: Envelope) -> Result<(), InvokerError> {
            Ok(())
        }

        fn recv_timeout(&self, _timeout: Duration) -> Result<Option<Envelope>, InvokerError> {
            Ok(None)
        }
    }

    fn connection(id: u128, tenants: &[&str], load: f64) -> Arc<dyn InstanceConnection> {
        let instance = MemoryInstance::new(InstanceId::from_u128(id), RouteIdentity::default());
        for tenant in tenants {
            instance.host(TenantId::from(*tenant));
        }
        instance.set_load(load);
        Arc::new(instance)
    }

    fn metadata(connection: &Arc<dyn InstanceConnection>) -> InstanceMetadata {
        connection.metadata().expect("元数据可读")
    }

    #[test]
    fn upsert_is_insert_if_absent() {
        let table = InvokerTable::default();
        let conn = connection(1, &["acme", "globex"], 0.5);
        let first = table.upsert_instance(&conn, metadata(&conn));
        assert_eq!(first.added, 2);
        let again = table.upsert_instance(&conn, metadata(&conn));
        assert_eq!(again.added, 0, "重复登记不应新增条目");
        assert!(again.removed.is_empty());
        assert_eq!(table.len(), 2);
        assert_eq!(table.tenant(&TenantId::from("acme")).len(), 1);
    }

    #[test]
    fn upsert_prunes_nodes_no_longer_advertised_and_updates_load() {
        let table = InvokerTable::default();
        let conn = connection(1, &["acme", "globex"], 0.5);
        table.upsert_instance(&conn, metadata(&conn));

        let mut next = metadata(&conn);
        next.node_ids
            .retain(|node| node.tenant().as_str() == "acme");
        next.load = 0.1;
        let changes = table.upsert_instance(&conn, next);
        assert_eq!(changes.removed.len(), 1);
        assert_eq!(changes.removed[0].node().tenant().as_str(), "globex");
        assert!(table.tenant(&TenantId::from("globex")).is_empty());
        let acme = table.tenant(&TenantId::from("acme"));
        assert!((acme[0].load() - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn start_happens_once_and_retire_stops() {
        let table = InvokerTable::default();
        let conn = connection(1, &["acme"], 0.0);
        table.upsert_instance(&conn, metadata(&conn));
        let entry = table.tenant(&TenantId::from("acme")).remove(0);

        let remote = Arc::new(CountingInvoker::default());
        let shared = Arc::clone(&remote);
        let factory = move |_: &NodeId| -> Arc<dyn RemoteInvoker> {
            Arc::clone(&shared) as Arc<dyn RemoteInvoker>
        };
        let first = entry.ensure_started(&factory).expect("首次启动");
        let second = entry.ensure_started(&factory).expect("再次获取");
        assert!(first.same_invoker(&second));
        assert_eq!(remote.starts.load(Ordering::SeqCst), 1);
        assert!(entry.started_address().is_some());

        entry.retire().expect("退役");
        assert_eq!(remote.stops.load(Ordering::SeqCst), 1);
        assert!(matches!(
            entry.ensure_started(&factory),
            Err(RegistryError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn replaced_connection_rebuilds_entries() {
        let table = InvokerTable::default();
        let old = connection(1, &["acme"], 0.0);
        table.upsert_instance(&old, metadata(&old));
        let replacement = connection(1, &["acme"], 0.0);
        let changes = table.upsert_instance(&replacement, metadata(&replacement));
        assert_eq!(changes.removed.len(), 1);
        assert_eq!(changes.added, 1);
        assert_eq!(table.len(), 1);
    }
}
