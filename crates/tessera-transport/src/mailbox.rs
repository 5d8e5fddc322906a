use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::poll::{Source, Waker};

/// 信箱关闭原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// 持有方主动关闭。
    Local,
    /// 对端关闭或断开。
    Remote,
    /// 底层传输故障。
    Failed,
}

/// 带就绪通知的多生产者接收队列。
///
/// # 教案式说明
/// - **意图 (Why)**：传输实现（进程内对端、TCP 读任务）与反应器之间唯一的交接点，
///   也被路由器复用为控制命令队列；
/// - **契约 (What)**：
///   - `push` 在关闭后返回原值，调用方据此得知对端已失效；
///   - `try_pop` 先交付关闭前已入队的所有元素，队列为空且已关闭时才返回关闭原因；
///   - 关闭只生效一次，并通过 waker 报告错误就绪；
/// - **执行逻辑 (How)**：状态放在一把 `parking_lot::Mutex` 中，唤醒在锁内完成，
///   锁顺序固定为“信箱 → 就绪队列”。
pub struct Mailbox<T> {
    state: Mutex<MailboxState<T>>,
}

struct MailboxState<T> {
    items: VecDeque<T>,
    closed: Option<CloseReason>,
    waker: Option<Waker>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState {
                items: VecDeque::new(),
                closed: None,
                waker: None,
            }),
        }
    }

    /// 入队。
    ///
    /// # Errors
    /// 信箱已关闭时原样退回元素。
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return Err(item);
        }
        state.items.push_back(item);
        if let Some(waker) = &state.waker {
            waker.wake_readable();
        }
        Ok(())
    }

    /// 出队一个元素。
    ///
    /// # Errors
    /// 队列已空且已关闭时返回关闭原因。
    pub fn try_pop(&self) -> Result<Option<T>, CloseReason> {
        let mut state = self.state.lock();
        match state.items.pop_front() {
            Some(item) => Ok(Some(item)),
            None => state.closed.map_or(Ok(None), Err),
        }
    }

    /// 关闭信箱；返回本次调用是否真正执行了关闭。
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut state = self.state.lock();
        if state.closed.is_some() {
            return false;
        }
        state.closed = Some(reason);
        if let Some(waker) = &state.waker {
            waker.wake_error();
        }
        true
    }

    /// 丢弃所有未读元素，返回丢弃数量。
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.items.len();
        state.items.clear();
        dropped
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 挂载 waker，已有数据或已关闭时立即补发通知。
    pub fn set_waker(&self, waker: Waker) {
        let mut state = self.state.lock();
        if !state.items.is_empty() {
            waker.wake_readable();
        }
        if state.closed.is_some() {
            waker.wake_error();
        }
        state.waker = Some(waker);
    }
}

impl<T> Source for Arc<Mailbox<T>> {
    fn attach(&mut self, waker: Waker) {
        self.set_waker(waker);
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mailbox")
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::poll::Poller;

    #[test]
    fn buffered_items_drain_before_close_is_reported() {
        let mailbox = Mailbox::new();
        mailbox.push(1).expect("未关闭时入队成功");
        mailbox.push(2).expect("未关闭时入队成功");
        assert!(mailbox.close(CloseReason::Remote));
        assert!(!mailbox.close(CloseReason::Local), "关闭只生效一次");
        assert_eq!(mailbox.push(3), Err(3));

        assert_eq!(mailbox.try_pop(), Ok(Some(1)));
        assert_eq!(mailbox.try_pop(), Ok(Some(2)));
        assert_eq!(mailbox.try_pop(), Err(CloseReason::Remote));
    }

    #[test]
    fn attaching_to_non_empty_mailbox_wakes_immediately() {
        let mut mailbox = Arc::new(Mailbox::new());
        mailbox.push("early").expect("入队");
        let mut poller = Poller::new();
        let token = poller.register(&mut mailbox);
        let events = poller.poll(Duration::from_millis(50));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token(), token);
        assert!(events[0].is_readable());
    }

    #[test]
    fn close_reports_error_readiness() {
        let mut mailbox: Arc<Mailbox<()>> = Arc::new(Mailbox::new());
        let mut poller = Poller::new();
        poller.register(&mut mailbox);
        mailbox.close(CloseReason::Failed);
        let events = poller.poll(Duration::from_millis(50));
        assert!(events.iter().any(|event| event.is_error()));
    }
}
