use std::sync::atomic::{AtomicU8, Ordering};

/// 路由器生命周期。
///
/// 合法迁移：`Stopped → Starting → Running → Stopping → Stopped`，
/// 启动失败时 `Starting → Stopped`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RouterState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl RouterState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// 原子存储的生命周期状态。
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(RouterState::Stopped as u8))
    }

    pub(crate) fn load(&self) -> RouterState {
        RouterState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: RouterState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// 仅当当前状态为 `from` 时迁移到 `to`，失败时返回实际状态。
    pub(crate) fn transition(&self, from: RouterState, to: RouterState) -> Result<(), RouterState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(RouterState::from_u8)
    }
}
