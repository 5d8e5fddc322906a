/// 反应器计数器快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// 从对外端点转交到后端的信封数。
    pub routed_inbound: u64,
    /// 从后端送回对外端点的信封数。
    pub routed_outbound: u64,
    /// 因结构非法被拒绝的信封数。
    pub malformed: u64,
    /// 因目标不可达或后端不可用而丢弃的信封数。
    pub dropped: u64,
    /// 累计创建的后端路由数。
    pub backends_opened: u64,
    /// 因传输故障拆除的后端路由数。
    pub backend_failures: u64,
}
