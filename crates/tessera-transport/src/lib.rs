#![deny(unsafe_code)]
//! # tessera-transport
//!
//! ## 角色定位（Why）
//! - 路由反应器是单线程同步循环，它需要一个“能同时等待多个套接字”的轮询原语，
//!   以及一组与具体传输无关的套接字契约；
//! - 本 crate 给出这些契约（[`Socket`]、[`BoundSocket`]、[`Transport`]），就绪轮询器
//!   [`Poller`]，以及默认的进程内传输 [`InprocTransport`]。
//!
//! ## 套接字语义（What）
//! - **绑定端**（[`BoundSocket`]）：接收时在信封头部压入对端身份帧，发送时弹出首帧作为目标身份；
//!   目标不存在时返回 [`TransportError::HostUnreachable`]。
//! - **连接端**（[`Socket`]）：信封原样收发。
//! - 所有套接字都只被一个线程拥有（`Send` 而非 `Sync`），跨线程唤醒只经过 [`Waker`]。
//!
//! ## 实现策略（How）
//! - 每个套接字的接收缓冲是一个 [`Mailbox`]；入队时通过挂载的 [`Waker`] 向所属轮询器报告就绪，
//!   关闭时报告错误。轮询器把同一令牌的多次通知合并为一个事件。

mod error;
mod inproc;
mod mailbox;
mod poll;
mod socket;

pub use error::TransportError;
pub use inproc::{INPROC_SCHEME, InprocTransport};
pub use mailbox::{CloseReason, Mailbox};
pub use poll::{Event, Poller, Source, Token, Waker};
pub use socket::{BoundSocket, Socket, Transport, TransportSet, recv_timeout, split_scheme};
