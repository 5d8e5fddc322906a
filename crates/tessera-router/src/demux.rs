use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use futures::channel::oneshot;
use futures::executor::block_on;
use parking_lot::Mutex;
use tessera_core::{RouteAddress, RouteId, RouteIdentity, RouterSettings, TenantId};
use tessera_transport::{CloseReason, Mailbox, Transport};

use crate::command::{Command, RouterStatus};
use crate::error::RouterError;
use crate::reactor::Reactor;
use crate::state::{RouterState, StateCell};

const REACTOR_THREAD_NAME: &str = "tessera-demux";

/// 按路由标识分发连接的路由器。
///
/// # 教案式说明
/// - **意图 (Why)**：对外只暴露一个端点，对内为每个租户维护一条惰性建立的后端路由；
/// - **契约 (What)**：
///   - [`Demultiplexer::start`] 仅在 `Stopped` 状态下成功，返回时对外端点已绑定完毕；
///     绑定失败时返回 [`RouterError::Bind`] 且状态回到 `Stopped`；
///   - [`Demultiplexer::stop`] 原子地取走反应器句柄：没有句柄时返回
///     [`RouterError::NotRunning`] 且不触碰任何套接字；有句柄时等待反应器在一个轮询间隔内退出，
///     并返回其收尾结果（或此前导致反应器退出的致命错误）；
///   - 控制命令在反应器线程内执行，调用方阻塞到回复到达；
/// - **执行逻辑 (How)**：生命周期状态存于原子量，反应器句柄存于 `Mutex<Option<_>>` 槽位，
///   两者配合保证并发的启动/停止各自只有一个赢家；
/// - **风险 (Trade-offs)**：反应器因对外端点失效退出后，状态仍显示 `Running`，
///   直到调用方执行 `stop` 取回错误；期间控制命令返回 [`RouterError::ReactorGone`]。
pub struct Demultiplexer {
    settings: RouterSettings,
    transport: Arc<dyn Transport>,
    identity: RouteIdentity,
    state: StateCell,
    slot: Mutex<Option<ReactorHandle>>,
}

struct ReactorHandle {
    thread: JoinHandle<Result<(), RouterError>>,
    stop: Arc<AtomicBool>,
    commands: Arc<Mailbox<Command>>,
}

impl fmt::Debug for Demultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demultiplexer")
            .field("bind_address", &self.settings.bind_address)
            .field("scheme", &self.identity.scheme())
            .field("state", &self.state.load())
            .finish()
    }
}

impl Demultiplexer {
    /// 以给定设置与传输构造路由器；此时不创建任何线程或套接字。
    #[must_use]
    pub fn new(settings: RouterSettings, transport: Arc<dyn Transport>) -> Self {
        let identity = RouteIdentity::new(settings.route_scheme.as_str());
        Self {
            settings,
            transport,
            identity,
            state: StateCell::new(),
            slot: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> RouterState {
        self.state.load()
    }

    #[must_use]
    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// 租户后端端点的地址；租户工作端应绑定到此地址。
    #[must_use]
    pub fn address_for(&self, tenant: &TenantId) -> RouteAddress {
        self.identity.address_for_tenant(tenant)
    }

    #[must_use]
    pub fn route_identity(&self) -> &RouteIdentity {
        &self.identity
    }

    /// 启动反应器线程并等待对外端点绑定结果。
    ///
    /// # Errors
    /// - 非 `Stopped` 状态：[`RouterError::AlreadyRunning`]；
    /// - 线程创建失败：[`RouterError::Spawn`]；
    /// - 对外端点绑定失败：[`RouterError::Bind`]。
    pub fn start(&self) -> Result<(), RouterError> {
        self.state
            .transition(RouterState::Stopped, RouterState::Starting)
            .map_err(|_| RouterError::AlreadyRunning)?;
        tracing::info!(address = %self.settings.bind_address, "demultiplexer starting");

        let stop = Arc::new(AtomicBool::new(false));
        let commands = Arc::new(Mailbox::new());
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), RouterError>>();

        let settings = self.settings.clone();
        let transport = Arc::clone(&self.transport);
        let identity = self.identity.clone();
        let reactor_commands = Arc::clone(&commands);
        let reactor_stop = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name(REACTOR_THREAD_NAME.to_owned())
            .spawn(move || {
                match Reactor::bind(settings, transport, identity, reactor_commands, reactor_stop)
                {
                    Ok(reactor) => {
                        let _ = ready_tx.send(Ok(()));
                        reactor.run()
                    }
                    Err(error) => {
                        let _ = ready_tx.send(Err(error));
                        Ok(())
                    }
                }
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(source) => {
                self.state.store(RouterState::Stopped);
                return Err(RouterError::Spawn { source });
            }
        };

        match block_on(ready_rx) {
            Ok(Ok(())) => {
                *self.slot.lock() = Some(ReactorHandle {
                    thread,
                    stop,
                    commands,
                });
                self.state.store(RouterState::Running);
                tracing::info!("demultiplexer running");
                Ok(())
            }
            Ok(Err(error)) => {
                let _ = thread.join();
                self.state.store(RouterState::Stopped);
                tracing::error!(%error, code = error.code(), "demultiplexer failed to start");
                Err(error)
            }
            Err(oneshot::Canceled) => {
                let _ = thread.join();
                self.state.store(RouterState::Stopped);
                Err(RouterError::ReactorPanicked)
            }
        }
    }

    /// 停止反应器并等待其退出。
    ///
    /// # Errors
    /// - 没有正在运行的反应器：[`RouterError::NotRunning`]；
    /// - 反应器此前因对外端点失效退出：[`RouterError::Frontend`]；
    /// - 收尾时有套接字关闭失败：[`RouterError::Teardown`]。
    pub fn stop(&self) -> Result<(), RouterError> {
        let handle = self.slot.lock().take().ok_or(RouterError::NotRunning)?;
        self.state.store(RouterState::Stopping);
        tracing::info!("demultiplexer stopping");

        handle.stop.store(true, Ordering::Release);
        let _ = handle.commands.push(Command::Shutdown);
        let outcome = handle
            .thread
            .join()
            .unwrap_or(Err(RouterError::ReactorPanicked));
        handle.commands.close(CloseReason::Local);
        handle.commands.clear();

        self.state.store(RouterState::Stopped);
        if let Err(error) = &outcome {
            tracing::warn!(%error, code = error.code(), "demultiplexer stopped with error");
        }
        outcome
    }

    /// 预先建立到租户的后端路由，返回其地址。
    ///
    /// # Errors
    /// 路由器未运行、反应器已退出，或后端连接失败（[`RouterError::Backend`]）。
    pub fn open(&self, tenant: &TenantId) -> Result<RouteAddress, RouterError> {
        self.open_route(self.identity.route_identifier_for(tenant))
    }

    /// 同 [`Demultiplexer::open`]，直接给出路由标识。
    ///
    /// # Errors
    /// 同 [`Demultiplexer::open`]。
    pub fn open_route(&self, route: RouteId) -> Result<RouteAddress, RouterError> {
        self.request(|reply| Command::Open { route, reply })?
    }

    /// 拆除到租户的后端路由，返回该路由此前是否存在。
    ///
    /// # Errors
    /// 路由器未运行或反应器已退出。
    pub fn close(&self, tenant: &TenantId) -> Result<bool, RouterError> {
        self.close_route(self.identity.route_identifier_for(tenant))
    }

    /// 同 [`Demultiplexer::close`]，直接给出路由标识。
    ///
    /// # Errors
    /// 同 [`Demultiplexer::close`]。
    pub fn close_route(&self, route: RouteId) -> Result<bool, RouterError> {
        self.request(|reply| Command::Close { route, reply })
    }

    /// 读取运行快照。
    ///
    /// # Errors
    /// 路由器未运行或反应器已退出。
    pub fn status(&self) -> Result<RouterStatus, RouterError> {
        self.request(|reply| Command::Status { reply })
    }

    fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RouterError> {
        let commands = self
            .slot
            .lock()
            .as_ref()
            .map(|handle| Arc::clone(&handle.commands))
            .ok_or(RouterError::NotRunning)?;
        let (reply, response) = oneshot::channel();
        if commands.push(build(reply)).is_err() {
            return Err(RouterError::ReactorGone);
        }
        block_on(response).map_err(|_| RouterError::ReactorGone)
    }
}

impl Drop for Demultiplexer {
    fn drop(&mut self) {
        if self.slot.get_mut().is_some() {
            if let Err(error) = self.stop() {
                tracing::warn!(%error, "demultiplexer dropped while running");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tessera_transport::InprocTransport;
    use tracing_test::traced_test;

    use super::*;

    #[test]
    #[traced_test]
    fn lifecycle_is_logged() {
        let transport = InprocTransport::new();
        let router = Demultiplexer::new(RouterSettings::default(), Arc::new(transport));
        router.start().expect("启动");
        router.stop().expect("停止");
        assert!(logs_contain("demultiplexer running"));
        assert!(logs_contain("demultiplexer stopping"));
    }

    #[test]
    fn drop_stops_a_running_reactor() {
        let transport = InprocTransport::new();
        let address = RouterSettings::default().bind_address;
        {
            let router =
                Demultiplexer::new(RouterSettings::default(), Arc::new(transport.clone()));
            router.start().expect("启动");
            assert!(transport.is_bound(&address));
        }
        assert!(!transport.is_bound(&address), "drop 应释放对外端点");
    }
}
