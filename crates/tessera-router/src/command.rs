use futures::channel::oneshot;
use tessera_core::{RouteAddress, RouteId};

use crate::error::RouterError;
use crate::state::RouterState;
use crate::stats::RouterStats;

/// 发往反应器线程的控制命令。
pub(crate) enum Command {
    /// 预先建立到某租户的后端路由。
    Open {
        route: RouteId,
        reply: oneshot::Sender<Result<RouteAddress, RouterError>>,
    },
    /// 拆除后端路由；回复该路由此前是否存在。
    Close {
        route: RouteId,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<RouterStatus>,
    },
    /// 唤醒反应器并结束循环。
    Shutdown,
}

/// 单条后端路由的运行信息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteStatus {
    pub route: RouteId,
    pub address: RouteAddress,
    pub forwarded_inbound: u64,
    pub forwarded_outbound: u64,
}

/// 路由器运行快照。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterStatus {
    pub state: RouterState,
    /// 对外端点的实际地址（绑定 `:0` 时为系统分配的端口）。
    pub frontend_address: String,
    pub connected_peers: usize,
    /// 按路由标识排序。
    pub routes: Vec<RouteStatus>,
    pub stats: RouterStats,
}
