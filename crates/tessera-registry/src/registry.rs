//! 远程调用器注册表。
//!
//! # 教案式说明
//! - **意图 (Why)**：调用方只知道租户，注册表负责回答“此刻该用哪个实例上的哪个调用器”，
//!   并把昂贵的连接建立推迟到第一次真正需要时；
//! - **契约 (What)**：
//!   - `start` 先订阅连接/断开事件，再枚举活跃连接；两条路径都走同一个“若不存在则登记”的入口，
//!     启动期间新连入的实例恰好登记一次；
//!   - 断开事件写入离场账本，晚到的枚举快照不会把已断开的实例登记回来；
//!   - 查询路径只读 `DashMap` 与 `ArcSwap`，不获取成员锁；启动竞争只发生在单个条目上；
//!   - `stop` 退订、停止后台线程、清空调用表并停止全部已启动的调用器，失败被聚合返回；
//! - **风险 (Trade-offs)**：负载快照异步更新，“最佳”只是启发式；实例断开时调用方手中已有的
//!   [`Invoker`] 不会被撤回，调用方从自己的收发中观察到故障后应重新申请。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::{Condvar, Mutex};
use tessera_core::{InstanceId, NodeId, RegistrySettings, TenantId};

use crate::connection::{
    ConnectionListener, InstanceConnection, InstanceConnectionService, Subscription,
};
use crate::error::{InvokerError, RegistryError};
use crate::invoker::{Invoker, RemoteInvokerFactory};
use crate::policy::{Candidate, LowestLoad, SelectionPolicy};
use crate::table::{Changes, InvokerEntry, InvokerTable};

const WORKER_THREAD_NAME: &str = "tessera-registry";

/// 单个调用器条目的运行信息。
#[derive(Clone, Debug, PartialEq)]
pub struct InvokerStatus {
    pub node: NodeId,
    /// 承载实例最近一次上报的负载。
    pub load: f64,
    pub started: bool,
    /// 已启动时调用器连接的地址。
    pub address: Option<String>,
}

/// 按租户选择远程调用器的注册表。
pub struct RemoteInvokerRegistry {
    settings: RegistrySettings,
    service: Arc<dyn InstanceConnectionService>,
    factory: Arc<dyn RemoteInvokerFactory>,
    policy: Arc<dyn SelectionPolicy>,
    context: ArcSwapOption<RegistryContext>,
    lifecycle: Mutex<Option<Running>>,
}

struct Running {
    context: Arc<RegistryContext>,
    connect: Subscription,
    disconnect: Subscription,
    worker: Option<Worker>,
}

impl fmt::Debug for RemoteInvokerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteInvokerRegistry")
            .field("policy", &self.policy)
            .field("running", &self.is_running())
            .finish()
    }
}

impl RemoteInvokerRegistry {
    /// 以默认的 [`LowestLoad`] 策略构造注册表；此时不订阅任何事件。
    #[must_use]
    pub fn new(
        settings: RegistrySettings,
        service: Arc<dyn InstanceConnectionService>,
        factory: Arc<dyn RemoteInvokerFactory>,
    ) -> Self {
        Self {
            settings,
            service,
            factory,
            policy: Arc::new(LowestLoad),
            context: ArcSwapOption::empty(),
            lifecycle: Mutex::new(None),
        }
    }

    /// 替换选择策略。
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.context.load().is_some()
    }

    /// 订阅成员事件、登记当前活跃连接并启动后台线程。
    ///
    /// # Errors
    /// - 已在运行：[`RegistryError::AlreadyRunning`]；
    /// - 后台线程无法创建：[`RegistryError::Spawn`]，此时订阅已撤销。
    pub fn start(&self) -> Result<(), RegistryError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.is_some() {
            return Err(RegistryError::AlreadyRunning);
        }

        let context = Arc::new(RegistryContext {
            settings: self.settings.clone(),
            service: Arc::clone(&self.service),
            factory: Arc::clone(&self.factory),
            policy: Arc::clone(&self.policy),
            table: InvokerTable::default(),
            membership: Mutex::new(Membership::default()),
        });
        let connect = self
            .service
            .subscribe_to_connect(listener(&context, RegistryContext::connected));
        let disconnect = self
            .service
            .subscribe_to_disconnect(listener(&context, RegistryContext::disconnected));

        for connection in self.service.active_connections() {
            context.register(&connection, Origin::Snapshot);
        }

        let worker = match Worker::spawn(&context) {
            Ok(worker) => worker,
            Err(source) => {
                connect.unsubscribe();
                disconnect.unsubscribe();
                context.close();
                return Err(RegistryError::Spawn { source });
            }
        };

        tracing::info!(
            instances = context.table.instance_ids().len(),
            nodes = context.table.len(),
            "invoker registry started"
        );
        self.context.store(Some(Arc::clone(&context)));
        *lifecycle = Some(Running {
            context,
            connect,
            disconnect,
            worker,
        });
        Ok(())
    }

    /// 退订、停止后台线程、清空调用表并停止全部已启动的调用器。
    ///
    /// # Errors
    /// - 未在运行：[`RegistryError::NotRunning`]；
    /// - 有调用器停止失败：[`RegistryError::Teardown`]，其余调用器仍已停止。
    pub fn stop(&self) -> Result<(), RegistryError> {
        let mut lifecycle = self.lifecycle.lock();
        let Running {
            context,
            connect,
            disconnect,
            worker,
        } = lifecycle.take().ok_or(RegistryError::NotRunning)?;
        self.context.store(None);

        connect.unsubscribe();
        disconnect.unsubscribe();
        if let Some(worker) = worker {
            worker.stop();
        }
        let failures = context.close();
        tracing::info!(failures = failures.len(), "invoker registry stopped");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Teardown { failures })
        }
    }

    /// 承载租户且负载最低的调用器，必要时先启动。
    ///
    /// # Errors
    /// - 未在运行：[`RegistryError::NotRunning`]；
    /// - 没有实例承载该租户：[`RegistryError::TenantNotFound`]；
    /// - 最佳候选打开路由或启动失败：[`RegistryError::Route`] / [`RegistryError::Start`]。
    pub fn best_invoker_for(&self, tenant: &TenantId) -> Result<Invoker, RegistryError> {
        let context = self.running()?;
        for entry in context.ranked(tenant) {
            match entry.ensure_started(context.factory.as_ref()) {
                Ok(invoker) => return Ok(invoker),
                // 条目在排序之后被移除，继续看下一个候选。
                Err(RegistryError::NodeNotFound { .. }) => {}
                Err(error) => return Err(error),
            }
        }
        Err(RegistryError::TenantNotFound {
            tenant: tenant.clone(),
        })
    }

    /// 承载租户的全部调用器，按策略排序，逐个懒启动。
    ///
    /// 启动失败的条目被跳过并记录告警；全部失败时返回第一个失败。
    ///
    /// # Errors
    /// - 未在运行：[`RegistryError::NotRunning`]；
    /// - 没有实例承载该租户：[`RegistryError::TenantNotFound`]；
    /// - 所有候选都启动失败：第一个候选的失败。
    pub fn all_invokers_for(&self, tenant: &TenantId) -> Result<Vec<Invoker>, RegistryError> {
        let context = self.running()?;
        let mut invokers = Vec::new();
        let mut first_failure = None;
        for entry in context.ranked(tenant) {
            match entry.ensure_started(context.factory.as_ref()) {
                Ok(invoker) => invokers.push(invoker),
                Err(RegistryError::NodeNotFound { .. }) => {}
                Err(error) => {
                    tracing::warn!(node = %entry.node(), %error, code = error.code(), "skipping invoker that failed to start");
                    first_failure.get_or_insert(error);
                }
            }
        }
        match (invokers.is_empty(), first_failure) {
            (true, Some(error)) => Err(error),
            (true, None) => Err(RegistryError::TenantNotFound {
                tenant: tenant.clone(),
            }),
            (false, _) => Ok(invokers),
        }
    }

    /// 指定节点的调用器，必要时先启动。
    ///
    /// # Errors
    /// - 未在运行：[`RegistryError::NotRunning`]；
    /// - 没有实例承载该节点：[`RegistryError::NodeNotFound`]；
    /// - 打开路由或启动失败：[`RegistryError::Route`] / [`RegistryError::Start`]。
    pub fn invoker_for(&self, node: &NodeId) -> Result<Invoker, RegistryError> {
        let context = self.running()?;
        let entry = context
            .table
            .node(node)
            .ok_or_else(|| RegistryError::NodeNotFound { node: node.clone() })?;
        entry.ensure_started(context.factory.as_ref())
    }

    /// 立即按活跃连接的最新元数据刷新调用表。
    ///
    /// # Errors
    /// 未在运行时返回 [`RegistryError::NotRunning`]。
    pub fn refresh(&self) -> Result<(), RegistryError> {
        self.running()?.refresh();
        Ok(())
    }

    /// 全部条目的运行信息，按节点排序。
    ///
    /// # Errors
    /// 未在运行时返回 [`RegistryError::NotRunning`]。
    pub fn invoker_status(&self) -> Result<Vec<InvokerStatus>, RegistryError> {
        Ok(self.running()?.status())
    }

    fn running(&self) -> Result<Arc<RegistryContext>, RegistryError> {
        self.context.load_full().ok_or(RegistryError::NotRunning)
    }
}

impl Drop for RemoteInvokerRegistry {
    fn drop(&mut self) {
        if self.lifecycle.get_mut().is_some() {
            if let Err(error) = self.stop() {
                tracing::warn!(%error, "invoker registry dropped while running");
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    /// 连接事件：实例确实在线，清除离场记录。
    Event,
    /// 枚举快照：可能已经过时，离场账本中的实例不予登记。
    Snapshot,
}

#[derive(Default)]
struct Membership {
    departed: HashMap<InstanceId, Instant>,
    closed: bool,
}

impl Membership {
    fn prune(&mut self, retention: Duration) {
        let now = Instant::now();
        self.departed
            .retain(|_, departed_at| now.duration_since(*departed_at) < retention);
    }
}

/// 一次运行期间的全部状态；停止后整体丢弃。
struct RegistryContext {
    settings: RegistrySettings,
    service: Arc<dyn InstanceConnectionService>,
    factory: Arc<dyn RemoteInvokerFactory>,
    policy: Arc<dyn SelectionPolicy>,
    table: InvokerTable,
    /// 串行化连接、断开与刷新；查询路径不获取。
    membership: Mutex<Membership>,
}

fn listener(
    context: &Arc<RegistryContext>,
    on_event: fn(&RegistryContext, &Arc<dyn InstanceConnection>),
) -> ConnectionListener {
    let context = Arc::downgrade(context);
    Arc::new(move |connection: &Arc<dyn InstanceConnection>| {
        if let Some(context) = context.upgrade() {
            on_event(&context, connection);
        }
    })
}

impl RegistryContext {
    fn connected(&self, connection: &Arc<dyn InstanceConnection>) {
        self.register(connection, Origin::Event);
    }

    fn disconnected(&self, connection: &Arc<dyn InstanceConnection>) {
        let instance = connection.instance_id();
        let changes = {
            let mut membership = self.membership.lock();
            if membership.closed {
                return;
            }
            membership.departed.insert(instance, Instant::now());
            self.table.remove_instance(instance)
        };
        tracing::info!(%instance, removed = changes.removed.len(), "instance left, invokers removed");
        self.retire(changes.removed);
    }

    /// 登记一个连接承载的全部节点；已存在的节点不重复登记。
    fn register(&self, connection: &Arc<dyn InstanceConnection>, origin: Origin) {
        let instance = connection.instance_id();
        let changes = {
            let mut membership = self.membership.lock();
            if membership.closed {
                return;
            }
            membership.prune(self.settings.departed_retention());
            match origin {
                Origin::Event => {
                    membership.departed.remove(&instance);
                }
                Origin::Snapshot if membership.departed.contains_key(&instance) => {
                    tracing::debug!(%instance, "ignoring stale snapshot of a departed instance");
                    return;
                }
                Origin::Snapshot => {}
            }
            match connection.metadata() {
                Ok(metadata) => self.table.upsert_instance(connection, metadata),
                Err(error) => {
                    tracing::warn!(%instance, %error, "instance metadata unavailable, not registered");
                    return;
                }
            }
        };
        if changes.added > 0 || !changes.removed.is_empty() {
            tracing::info!(
                %instance,
                added = changes.added,
                removed = changes.removed.len(),
                ?origin,
                "instance registered"
            );
        }
        self.retire(changes.removed);
    }

    fn refresh(&self) {
        let connections = self.service.active_connections();
        let changes = {
            let mut membership = self.membership.lock();
            if membership.closed {
                return;
            }
            membership.prune(self.settings.departed_retention());
            let mut changes = Changes::default();
            let mut listed = HashSet::new();
            for connection in &connections {
                let instance = connection.instance_id();
                if membership.departed.contains_key(&instance) {
                    continue;
                }
                match connection.metadata() {
                    Ok(metadata) => {
                        listed.insert(instance);
                        changes.merge(self.table.upsert_instance(connection, metadata));
                    }
                    Err(error) => {
                        tracing::warn!(%instance, %error, "dropping instance whose metadata is unavailable");
                    }
                }
            }
            changes.merge(self.table.retain_instances(&listed));
            changes
        };
        tracing::debug!(
            connections = connections.len(),
            added = changes.added,
            removed = changes.removed.len(),
            "invoker registry refreshed"
        );
        self.retire(changes.removed);
    }

    /// 按策略排序的候选条目。负载先取快照，保证排序期间比较结果一致。
    fn ranked(&self, tenant: &TenantId) -> Vec<Arc<InvokerEntry>> {
        let mut scored: Vec<(f64, Arc<InvokerEntry>)> = self
            .table
            .tenant(tenant)
            .into_iter()
            .map(|entry| (entry.load(), entry))
            .collect();
        scored.sort_by(|(left_load, left), (right_load, right)| {
            self.policy.compare(
                &Candidate {
                    node: left.node(),
                    load: *left_load,
                },
                &Candidate {
                    node: right.node(),
                    load: *right_load,
                },
            )
        });
        scored.into_iter().map(|(_, entry)| entry).collect()
    }

    fn status(&self) -> Vec<InvokerStatus> {
        let mut status: Vec<InvokerStatus> = self
            .table
            .entries()
            .iter()
            .map(|entry| {
                let address = entry.started_address();
                InvokerStatus {
                    node: entry.node().clone(),
                    load: entry.load(),
                    started: address.is_some(),
                    address,
                }
            })
            .collect();
        status.sort_by(|left, right| left.node.cmp(&right.node));
        status
    }

    fn report(&self) {
        let status = self.status();
        tracing::info!(
            instances = self.table.instance_ids().len(),
            nodes = status.len(),
            started = status.iter().filter(|entry| entry.started).count(),
            "invocation table"
        );
        for entry in &status {
            tracing::debug!(
                node = %entry.node,
                load = entry.load,
                address = entry.address.as_deref().unwrap_or("-"),
                "invocation entry"
            );
        }
    }

    /// 停止接受成员事件并清空调用表，返回所有停止失败。
    fn close(&self) -> Vec<InvokerError> {
        let entries = {
            let mut membership = self.membership.lock();
            membership.closed = true;
            membership.departed.clear();
            self.table.clear()
        };
        self.retire(entries)
    }

    fn retire(&self, entries: Vec<Arc<InvokerEntry>>) -> Vec<InvokerError> {
        entries
            .into_iter()
            .filter_map(|entry| match entry.retire() {
                Ok(()) => None,
                Err(error) => {
                    tracing::error!(node = %entry.node(), %error, code = error.code(), "invoker did not stop cleanly");
                    Some(error)
                }
            })
            .collect()
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    /// 等到截止时间或收到停止信号；返回是否已停止。
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.condvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    fn raise(&self) {
        *self.stopped.lock() = true;
        self.condvar.notify_all();
    }
}

/// 定期刷新调用表并输出调用表日志的后台线程。
struct Worker {
    thread: JoinHandle<()>,
    signal: Arc<StopSignal>,
}

impl Worker {
    /// 刷新与报告都被关闭时不创建线程。
    fn spawn(context: &Arc<RegistryContext>) -> std::io::Result<Option<Self>> {
        let refresh = context.settings.refresh_interval();
        let report =
            Some(context.settings.report_interval()).filter(|interval| !interval.is_zero());
        if refresh.is_none() && report.is_none() {
            return Ok(None);
        }

        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let context = Arc::clone(context);
        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_owned())
            .spawn(move || run_worker(&context, &thread_signal, refresh, report))?;
        Ok(Some(Self { thread, signal }))
    }

    fn stop(self) {
        self.signal.raise();
        if self.thread.join().is_err() {
            tracing::error!("registry worker thread panicked");
        }
    }
}

fn run_worker(
    context: &RegistryContext,
    signal: &StopSignal,
    refresh: Option<Duration>,
    report: Option<Duration>,
) {
    let start = Instant::now();
    let mut next_refresh = refresh.map(|interval| start + interval);
    let mut next_report = report.map(|interval| start + interval);
    loop {
        let deadline = match (next_refresh, next_report) {
            (Some(refresh), Some(report)) => refresh.min(report),
            (Some(due), None) | (None, Some(due)) => due,
            (None, None) => return,
        };
        if signal.wait_until(deadline) {
            return;
        }
        let now = Instant::now();
        if let (Some(due), Some(interval)) = (next_refresh, refresh) {
            if now >= due {
                context.refresh();
                next_refresh = Some(now + interval);
            }
        }
        if let (Some(due), Some(interval)) = (next_report, report) {
            if now >= due {
                context.report();
                next_report = Some(now + interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::RouteIdentity;
    use tessera_transport::InprocTransport;
    use tracing_test::traced_test;

    use super::*;
    use crate::connection::{MemoryConnectionService, MemoryInstance};
    use crate::invoker::TransportInvoker;

    fn quiet_settings() -> RegistrySettings {
        RegistrySettings {
            refresh_interval_ms: 0,
            ..RegistrySettings::default()
        }
    }

    #[test]
    #[traced_test]
    fn membership_changes_are_logged() {
        let service = MemoryConnectionService::new();
        let registry = RemoteInvokerRegistry::new(
            quiet_settings(),
            Arc::new(service.clone()),
            Arc::new(TransportInvoker::factory(Arc::new(InprocTransport::new()))),
        );
        registry.start().expect("启动");

        let instance = Arc::new(MemoryInstance::new(
            InstanceId::from_u128(9),
            RouteIdentity::default(),
        ));
        instance.host(TenantId::from("acme"));
        service.connect(instance);
        assert!(service.disconnect(InstanceId::from_u128(9)));
        registry.stop().expect("停止");

        assert!(logs_contain("invoker registry started"));
        assert!(logs_contain("instance registered"));
        assert!(logs_contain("instance left, invokers removed"));
        assert!(logs_contain("invoker registry stopped"));
    }

    #[test]
    fn departed_ledger_expires() {
        let mut membership = Membership::default();
        let instance = InstanceId::from_u128(1);
        membership.departed.insert(instance, Instant::now());
        membership.prune(Duration::from_secs(60));
        assert!(membership.departed.contains_key(&instance));
        membership.prune(Duration::ZERO);
        assert!(membership.departed.is_empty(), "保留期为零时账本立即清空");
    }

    #[test]
    fn worker_is_not_spawned_when_everything_is_disabled() {
        let context = Arc::new(RegistryContext {
            settings: RegistrySettings {
                refresh_interval_ms: 0,
                report_interval_ms: 0,
                ..RegistrySettings::default()
            },
            service: Arc::new(MemoryConnectionService::new()),
            factory: Arc::new(TransportInvoker::factory(Arc::new(InprocTransport::new()))),
            policy: Arc::new(LowestLoad),
            table: InvokerTable::default(),
            membership: Mutex::new(Membership::default()),
        });
        assert!(Worker::spawn(&context).expect("无需创建线程").is_none());
    }
}
