//! 后端路由表。
//!
//! # 教案式说明
//! - **意图 (Why)**：反应器需要两个方向的查找：入站时按 [`RouteId`] 找后端套接字，
//!   出站时按轮询令牌找回路由；
//! - **契约 (What)**：
//!   - 每个 `RouteId` 至多一条后端路由，首次使用时惰性创建并注册到轮询器；
//!   - 拆除时同时注销令牌、移除双向索引并关闭套接字；
//!   - 只被反应器线程访问，不做任何同步；
//! - **风险 (Trade-offs)**：空闲路由不会自动回收，租户数量即为常驻连接数的上界。

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tessera_core::{RouteAddress, RouteId, RouteIdentity};
use tessera_transport::{Poller, Socket, Token, Transport, TransportError};

use crate::command::RouteStatus;

pub(crate) struct BackendRoute {
    pub(crate) socket: Box<dyn Socket>,
    pub(crate) token: Token,
    pub(crate) address: RouteAddress,
    pub(crate) forwarded_inbound: u64,
    pub(crate) forwarded_outbound: u64,
}

#[derive(Default)]
pub(crate) struct BackendTable {
    routes: HashMap<RouteId, BackendRoute>,
    tokens: HashMap<Token, RouteId>,
}

impl BackendTable {
    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn route_for(&self, token: Token) -> Option<RouteId> {
        self.tokens.get(&token).copied()
    }

    pub(crate) fn get_mut(&mut self, route: RouteId) -> Option<&mut BackendRoute> {
        self.routes.get_mut(&route)
    }

    /// 查找或创建后端路由。第二个返回值表示本次是否新建。
    pub(crate) fn open(
        &mut self,
        route: RouteId,
        poller: &mut Poller,
        transport: &dyn Transport,
        identity: &RouteIdentity,
    ) -> Result<(&mut BackendRoute, bool), TransportError> {
        match self.routes.entry(route) {
            Entry::Occupied(entry) => Ok((entry.into_mut(), false)),
            Entry::Vacant(slot) => {
                let address = identity.address_for(route);
                let mut socket = transport.connect(&address.to_string())?;
                let token = poller.register(socket.as_mut());
                self.tokens.insert(token, route);
                tracing::info!(%route, %address, "backend route opened");
                let backend = slot.insert(BackendRoute {
                    socket,
                    token,
                    address,
                    forwarded_inbound: 0,
                    forwarded_outbound: 0,
                });
                Ok((backend, true))
            }
        }
    }

    /// 拆除后端路由；路由不存在时返回 `None`。
    pub(crate) fn close(
        &mut self,
        route: RouteId,
        poller: &mut Poller,
    ) -> Option<Result<(), TransportError>> {
        let mut backend = self.routes.remove(&route)?;
        self.tokens.remove(&backend.token);
        poller.deregister(backend.token);
        tracing::info!(%route, address = %backend.address, "backend route closed");
        Some(backend.socket.close())
    }

    /// 拆除全部后端路由，返回所有关闭失败。
    pub(crate) fn close_all(&mut self, poller: &mut Poller) -> Vec<TransportError> {
        let routes: Vec<RouteId> = self.routes.keys().copied().collect();
        routes
            .into_iter()
            .filter_map(|route| self.close(route, poller))
            .filter_map(Result::err)
            .collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<RouteStatus> {
        let mut routes: Vec<RouteStatus> = self
            .routes
            .iter()
            .map(|(route, backend)| RouteStatus {
                route: *route,
                address: backend.address.clone(),
                forwarded_inbound: backend.forwarded_inbound,
                forwarded_outbound: backend.forwarded_outbound,
            })
            .collect();
        routes.sort_by_key(|status| status.route);
        routes
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::TenantId;
    use tessera_transport::InprocTransport;

    use super::*;

    #[test]
    fn open_is_lazy_and_idempotent() {
        let transport = InprocTransport::new();
        let identity = RouteIdentity::default();
        let tenant = TenantId::from("acme");
        let route = identity.route_identifier_for(&tenant);
        let _worker = transport
            .bind(&identity.address_for(route).to_string())
            .expect("租户端点绑定");

        let mut poller = Poller::new();
        let mut table = BackendTable::default();
        let (_, created) = table
            .open(route, &mut poller, &transport, &identity)
            .expect("首次打开应建立连接");
        assert!(created);
        let (backend, created) = table
            .open(route, &mut poller, &transport, &identity)
            .expect("再次打开复用已有路由");
        assert!(!created);
        let token = backend.token;
        assert_eq!(table.route_for(token), Some(route));
        assert_eq!(poller.registered(), 1);

        assert!(matches!(table.close(route, &mut poller), Some(Ok(()))));
        assert!(table.close(route, &mut poller).is_none());
        assert_eq!(table.route_for(token), None);
        assert_eq!(poller.registered(), 0);
    }

    #[test]
    fn failed_connect_leaves_no_entry() {
        let transport = InprocTransport::new();
        let identity = RouteIdentity::default();
        let route = identity.route_identifier_for(&TenantId::from("absent"));
        let mut poller = Poller::new();
        let mut table = BackendTable::default();
        assert!(
            table
                .open(route, &mut poller, &transport, &identity)
                .is_err()
        );
        assert_eq!(table.len(), 0);
        assert_eq!(poller.registered(), 0);
    }
}
