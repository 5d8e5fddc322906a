#![deny(unsafe_code)]
//! # tessera-router
//!
//! ## 角色定位（Why）
//! - 集群节点只暴露一个对外端点，所有租户的请求都从这里进入；
//! - 本 crate 的 [`Demultiplexer`] 在单个反应器线程中读取信封里的路由标识，把请求转交给对应租户的
//!   内部端点，并把租户的回复送回原连接。
//!
//! ## 线程模型（What）
//! - 对外端点、每条后端路由、控制命令信箱全部由反应器线程独占；
//! - 跨线程操作只有 `start`、`stop` 与控制命令（`open`/`close`/`status`），后者通过信箱排队、
//!   经一次性通道取回结果；
//! - 每轮轮询的阻塞时长不超过 `poll_interval`，`stop` 因此在有界时间内生效。
//!
//! ## 故障分级（How）
//! - 信封结构非法：关闭发送方连接，继续运行；
//! - 后端路由故障：只拆除该路由，下一条发往该租户的消息重新创建；
//! - 对外端点故障：反应器退出，错误由下一次 `stop` 返回，需要显式重启。

mod command;
mod demux;
mod error;
mod reactor;
mod state;
mod stats;
mod table;

pub use command::{RouteStatus, RouterStatus};
pub use demux::Demultiplexer;
pub use error::RouterError;
pub use state::RouterState;
pub use stats::RouterStats;
