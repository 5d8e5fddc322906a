#![deny(unsafe_code)]
//! # tessera-transport-tcp
//!
//! ## 角色定位（Why）
//! - 为跨主机部署提供 `tcp://host:port` 形式的端点，语义与进程内传输完全一致：
//!   绑定端按身份帧路由回复，连接端原样收发；
//! - 反应器仍然是同步单线程，网络 IO 交给本 crate 私有的 Tokio 运行时，两者之间只通过
//!   [`tessera_transport::Mailbox`] 与无界通道交接。
//!
//! ## 线上格式（What）
//! - 一个信封编码为 `u32 帧数` 加若干 `u32 长度 + 字节`，整数均为大端；
//! - 单帧超过 `max_frame_len` 或帧数为 0 视为协议错误，连接被关闭。
//!
//! ## 风险（Trade-offs）
//! - `bind`/`connect` 在调用线程上 `block_on` 私有运行时，不能在异步上下文中调用。

mod codec;
mod error;
mod transport;

pub use codec::{CodecError, MAX_FRAMES, decode, encode};
pub use transport::{TCP_SCHEME, TcpTransport};
