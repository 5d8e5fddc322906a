//! 反应器线程的主体。
//!
//! # 教案式说明
//! - **意图 (Why)**：所有套接字只在这一个线程里读写，路由表无需任何锁；
//! - **契约 (What)**：
//!   - [`Reactor::bind`] 在反应器线程内绑定对外端点并注册控制信箱，失败时不留下任何资源；
//!   - [`Reactor::run`] 循环直到停止标志置位或对外端点失效，随后关闭全部套接字；
//!   - 每个可读来源都被读空，保证同一来源的消息按到达顺序转发；
//! - **执行逻辑 (How)**：事件按令牌分派到三类处理：对外端点、控制信箱、后端路由。
//!   错误事件与可读事件走同一条读取路径：先读出缓冲中的剩余消息，再处理错误。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tessera_core::{Envelope, EnvelopeError, RouteId, RouteIdentity, RouterSettings};
use tessera_transport::{
    BoundSocket, CloseReason, Mailbox, Poller, Token, Transport, TransportError,
};

use crate::command::{Command, RouterStatus};
use crate::error::RouterError;
use crate::state::RouterState;
use crate::stats::RouterStats;
use crate::table::BackendTable;

pub(crate) struct Reactor {
    settings: RouterSettings,
    transport: Arc<dyn Transport>,
    identity: RouteIdentity,
    poller: Poller,
    frontend: Box<dyn BoundSocket>,
    frontend_token: Token,
    commands: Arc<Mailbox<Command>>,
    command_token: Token,
    backends: BackendTable,
    stats: RouterStats,
    stop: Arc<AtomicBool>,
}

impl Reactor {
    pub(crate) fn bind(
        settings: RouterSettings,
        transport: Arc<dyn Transport>,
        identity: RouteIdentity,
        mut commands: Arc<Mailbox<Command>>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, RouterError> {
        let mut frontend =
            transport
                .bind(&settings.bind_address)
                .map_err(|source| RouterError::Bind {
                    address: settings.bind_address.clone(),
                    source,
                })?;
        let mut poller = Poller::new();
        let frontend_token = poller.register(frontend.as_mut());
        let command_token = poller.register(&mut commands);
        tracing::info!(
            address = %frontend.address(),
            scheme = identity.scheme(),
            "demultiplexer frontend bound"
        );
        Ok(Self {
            settings,
            transport,
            identity,
            poller,
            frontend,
            frontend_token,
            commands,
            command_token,
            backends: BackendTable::default(),
            stats: RouterStats::default(),
            stop,
        })
    }

    /// 运行事件循环直到停止，然后收尾。
    pub(crate) fn run(mut self) -> Result<(), RouterError> {
        let outcome = self.event_loop();
        let teardown = self.shutdown();
        match outcome {
            Err(fatal) => {
                if let Err(error) = teardown {
                    tracing::warn!(%error, "teardown after fatal error was incomplete");
                }
                Err(fatal)
            }
            Ok(()) => teardown,
        }
    }

    fn event_loop(&mut self) -> Result<(), RouterError> {
        let poll_interval = self.settings.poll_interval();
        let stats_interval = self.settings.stats_interval();
        let mut next_report = stats_interval.map(|interval| Instant::now() + interval);

        while !self.stop.load(Ordering::Acquire) {
            for event in self.poller.poll(poll_interval) {
                let token = event.token();
                if token == self.frontend_token {
                    self.forward_inbound()?;
                } else if token == self.command_token {
                    self.drain_commands();
                } else {
                    self.forward_outbound(token)?;
                }
            }

            if let (Some(due), Some(interval)) = (next_report, stats_interval) {
                if Instant::now() >= due {
                    self.report();
                    next_report = Some(Instant::now() + interval);
                }
            }
        }
        tracing::info!("demultiplexer stop requested");
        Ok(())
    }

    /// 读空对外端点并逐个转交。对外端点读取失败是致命的。
    fn forward_inbound(&mut self) -> Result<(), RouterError> {
        loop {
            match self.frontend.try_recv() {
                Ok(Some(envelope)) => self.route_inbound(envelope),
                Ok(None) => return Ok(()),
                Err(source) => {
                    tracing::error!(address = %self.frontend.address(), error = %source, "frontend failed");
                    return Err(RouterError::Frontend {
                        address: self.frontend.address().to_owned(),
                        source,
                    });
                }
            }
        }
    }

    fn route_inbound(&mut self, mut envelope: Envelope) {
        let route = match envelope.take_route_id() {
            Ok(route) => route,
            Err(error) => {
                self.reject_malformed(&envelope, &error);
                return;
            }
        };

        let sent = match self.backends.open(
            route,
            &mut self.poller,
            self.transport.as_ref(),
            &self.identity,
        ) {
            Ok((backend, created)) => {
                if created {
                    self.stats.backends_opened += 1;
                }
                backend.forwarded_inbound += 1;
                backend.socket.send(envelope)
            }
            Err(error) => {
                self.stats.dropped += 1;
                tracing::warn!(%route, %error, code = error.code(), "backend route unavailable, dropping message");
                return;
            }
        };

        match sent {
            Ok(()) => self.stats.routed_inbound += 1,
            Err(error) => {
                self.stats.dropped += 1;
                tracing::warn!(%route, %error, "backend send failed, dropping message");
                self.fail_backend(route);
            }
        }
    }

    fn reject_malformed(&mut self, envelope: &Envelope, error: &EnvelopeError) {
        self.stats.malformed += 1;
        let Some(identity) = envelope.front().cloned() else {
            tracing::warn!(%error, "malformed envelope without identity, dropping");
            return;
        };
        tracing::warn!(%error, code = error.code(), "malformed envelope, closing peer connection");
        if let Err(close_error) = self.frontend.disconnect_peer(&identity) {
            tracing::warn!(error = %close_error, "failed to close malformed peer");
        }
    }

    /// 读空一条后端路由并把回复送回对外端点。
    fn forward_outbound(&mut self, token: Token) -> Result<(), RouterError> {
        let Some(route) = self.backends.route_for(token) else {
            return Ok(());
        };
        loop {
            let Some(backend) = self.backends.get_mut(route) else {
                return Ok(());
            };
            let envelope = match backend.socket.try_recv() {
                Ok(Some(envelope)) => {
                    backend.forwarded_outbound += 1;
                    envelope
                }
                Ok(None) => return Ok(()),
                Err(error) => {
                    tracing::warn!(%route, %error, "backend route failed");
                    self.fail_backend(route);
                    return Ok(());
                }
            };
            self.reply(envelope)?;
        }
    }

    fn reply(&mut self, envelope: Envelope) -> Result<(), RouterError> {
        match self.frontend.send(envelope) {
            Ok(()) => {
                self.stats.routed_outbound += 1;
                Ok(())
            }
            // 只与这一条回复有关的错误：丢弃并计数，对外端点继续服务其他租户。
            Err(
                error @ (TransportError::HostUnreachable { .. } | TransportError::Protocol { .. }),
            ) => {
                self.stats.dropped += 1;
                tracing::warn!(%error, code = error.code(), "reply cannot be delivered, dropping it");
                Ok(())
            }
            Err(source) => Err(RouterError::Frontend {
                address: self.frontend.address().to_owned(),
                source,
            }),
        }
    }

    fn fail_backend(&mut self, route: RouteId) {
        self.stats.backend_failures += 1;
        if let Some(Err(error)) = self.backends.close(route, &mut self.poller) {
            tracing::warn!(%route, %error, "backend route did not close cleanly");
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_pop() {
                Ok(Some(command)) => self.execute(command),
                Ok(None) | Err(_) => return,
            }
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Open { route, reply } => {
                let outcome = self
                    .backends
                    .open(
                        route,
                        &mut self.poller,
                        self.transport.as_ref(),
                        &self.identity,
                    )
                    .map(|(backend, created)| (backend.address.clone(), created))
                    .map_err(|source| RouterError::Backend { route, source });
                if let Ok((_, true)) = outcome {
                    self.stats.backends_opened += 1;
                }
                let _ = reply.send(outcome.map(|(address, _)| address));
            }
            Command::Close { route, reply } => {
                let existed = match self.backends.close(route, &mut self.poller) {
                    Some(Ok(())) => true,
                    Some(Err(error)) => {
                        tracing::warn!(%route, %error, "backend route did not close cleanly");
                        true
                    }
                    None => false,
                };
                let _ = reply.send(existed);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => self.stop.store(true, Ordering::Release),
        }
    }

    fn status(&self) -> RouterStatus {
        RouterStatus {
            state: RouterState::Running,
            frontend_address: self.frontend.address().to_owned(),
            connected_peers: self.frontend.peer_count(),
            routes: self.backends.snapshot(),
            stats: self.stats,
        }
    }

    fn report(&self) {
        let status = self.status();
        tracing::debug!(
            routes = status.routes.len(),
            peers = status.connected_peers,
            inbound = status.stats.routed_inbound,
            outbound = status.stats.routed_outbound,
            malformed = status.stats.malformed,
            dropped = status.stats.dropped,
            "routing table"
        );
        for route in &status.routes {
            tracing::debug!(
                route = %route.route,
                address = %route.address,
                inbound = route.forwarded_inbound,
                outbound = route.forwarded_outbound,
                "routing entry"
            );
        }
    }

    /// 关闭对外端点与全部后端路由，聚合所有失败。
    fn shutdown(&mut self) -> Result<(), RouterError> {
        // 先关信箱再清空：之后的命令入队直接失败，已排队命令的回复端随之释放。
        self.commands.close(CloseReason::Local);
        let abandoned = self.commands.clear();
        if abandoned > 0 {
            tracing::debug!(abandoned, "pending commands discarded at shutdown");
        }

        let mut failures = Vec::new();
        self.poller.deregister(self.frontend_token);
        if let Err(error) = self.frontend.close() {
            failures.push(error);
        }
        let routes = self.backends.len();
        failures.extend(self.backends.close_all(&mut self.poller));
        tracing::info!(routes, failures = failures.len(), "demultiplexer stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RouterError::Teardown { failures })
        }
    }
}
