//! 就绪轮询器。
//!
//! # 教案式说明
//! - **意图 (Why)**：反应器线程需要在一次阻塞调用中等待“任意一个套接字可读或出错”，并且阻塞时长有上界，
//!   以便在超时后检查停止标志；
//! - **契约 (What)**：
//!   - [`Poller::register`] 为来源分配唯一 [`Token`] 并挂载 [`Waker`]；
//!   - [`Poller::poll`] 最多阻塞 `timeout`，返回按首次通知顺序排列、按令牌去重的事件；
//!   - 已注销令牌的事件被丢弃；
//! - **执行逻辑 (How)**：共享的 `ReadinessQueue` 由 `parking_lot::Mutex` 与 `Condvar` 组成，
//!   唤醒方在锁内合并事件并通知等待方；
//! - **风险 (Trade-offs)**：合并使用线性查找，适合“每轮事件数远小于千”的规模。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// 轮询令牌。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

/// 一次就绪通知。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    token: Token,
    readable: bool,
    error: bool,
}

impl Event {
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.readable
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error
    }
}

#[derive(Default)]
struct ReadinessQueue {
    pending: Mutex<Vec<Event>>,
    signal: Condvar,
}

impl ReadinessQueue {
    fn notify(&self, token: Token, readable: bool, error: bool) {
        let mut pending = self.pending.lock();
        match pending.iter_mut().find(|event| event.token == token) {
            Some(event) => {
                event.readable |= readable;
                event.error |= error;
            }
            None => pending.push(Event {
                token,
                readable,
                error,
            }),
        }
        self.signal.notify_one();
    }

    fn wait(&self, timeout: Duration) -> Vec<Event> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while pending.is_empty() {
            if self.signal.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        std::mem::take(&mut *pending)
    }
}

/// 跨线程唤醒句柄，绑定到某个轮询器的某个令牌。
#[derive(Clone)]
pub struct Waker {
    queue: Arc<ReadinessQueue>,
    token: Token,
}

impl Waker {
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn wake_readable(&self) {
        self.queue.notify(self.token, true, false);
    }

    pub fn wake_error(&self) {
        self.queue.notify(self.token, false, true);
    }
}

impl std::fmt::Debug for Waker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waker").field("token", &self.token).finish()
    }
}

/// 可被轮询的来源。
///
/// 实现方在挂载时若已有待读数据或已处于错误状态，必须立即通过新 waker 报告，
/// 否则注册前到达的数据会被永久遗漏。
pub trait Source {
    fn attach(&mut self, waker: Waker);
}

/// 单线程拥有的就绪轮询器。
pub struct Poller {
    queue: Arc<ReadinessQueue>,
    next_token: usize,
    live: HashSet<Token>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ReadinessQueue::default()),
            next_token: 0,
            live: HashSet::new(),
        }
    }

    /// 注册来源并返回其令牌。令牌在轮询器生命周期内不复用。
    pub fn register<S>(&mut self, source: &mut S) -> Token
    where
        S: Source + ?Sized,
    {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.live.insert(token);
        source.attach(Waker {
            queue: Arc::clone(&self.queue),
            token,
        });
        token
    }

    /// 注销令牌，返回它此前是否处于注册状态。
    pub fn deregister(&mut self, token: Token) -> bool {
        self.live.remove(&token)
    }

    #[must_use]
    pub fn registered(&self) -> usize {
        self.live.len()
    }

    /// 等待就绪事件，最多阻塞 `timeout`。
    pub fn poll(&mut self, timeout: Duration) -> Vec<Event> {
        let mut events = self.queue.wait(timeout);
        events.retain(|event| self.live.contains(&event.token));
        events
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("registered", &self.live.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe(Option<Waker>);

    impl Source for Probe {
        fn attach(&mut self, waker: Waker) {
            self.0 = Some(waker);
        }
    }

    #[test]
    fn notifications_for_same_token_are_merged() {
        let mut poller = Poller::new();
        let mut probe = Probe(None);
        let token = poller.register(&mut probe);
        let waker = probe.0.clone().expect("注册后应挂载 waker");
        waker.wake_readable();
        waker.wake_readable();
        waker.wake_error();

        let events = poller.poll(Duration::from_millis(10));
        assert_eq!(events.len(), 1, "同一令牌的通知必须合并");
        assert_eq!(events[0].token(), token);
        assert!(events[0].is_readable() && events[0].is_error());
    }

    #[test]
    fn poll_times_out_without_events() {
        let mut poller = Poller::new();
        let started = Instant::now();
        assert!(poller.poll(Duration::from_millis(20)).is_empty());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn deregistered_tokens_are_filtered() {
        let mut poller = Poller::new();
        let mut probe = Probe(None);
        let token = poller.register(&mut probe);
        assert!(poller.deregister(token));
        probe.0.as_ref().expect("waker").wake_readable();
        assert!(poller.poll(Duration::from_millis(5)).is_empty());
        assert_eq!(poller.registered(), 0);
    }

    #[test]
    fn cross_thread_wake_releases_poll() {
        let mut poller = Poller::new();
        let mut probe = Probe(None);
        let token = poller.register(&mut probe);
        let waker = probe.0.take().expect("waker");
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            waker.wake_readable();
        });
        let events = poller.poll(Duration::from_secs(5));
        handle.join().expect("唤醒线程不应 panic");
        assert_eq!(events.first().map(Event::token), Some(token));
    }
}
