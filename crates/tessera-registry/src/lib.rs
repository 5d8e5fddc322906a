#![deny(unsafe_code)]
//! # tessera-registry
//!
//! ## 角色定位（Why）
//! - 集群中同一租户可能同时运行在多个实例上；发起远程调用的一方只持有租户标识，
//!   需要有人回答“现在调哪一个实例”；
//! - [`RemoteInvokerRegistry`] 跟踪成员服务报告的实例与其承载的节点，按 [`SelectionPolicy`]
//!   选出候选，并在第一次使用时才建立连接。
//!
//! ## 协作方（What）
//! - [`InstanceConnectionService`]：活跃连接枚举与连接/断开事件；
//! - [`InstanceConnection`]：实例元数据与“为节点打开路由”；
//! - [`RemoteInvokerFactory`] / [`RemoteInvoker`]：真正承载调用的通道，
//!   [`TransportInvoker`] 是基于 `tessera-transport` 的默认实现。
//!
//! ## 并发模型（How）
//! - 调用方线程的查询不获取全局锁；
//! - 成员变更（连接、断开、刷新）经同一把成员锁串行化；
//! - 每个节点条目自带启动锁，保证底层连接只建立一次。

mod connection;
mod error;
mod invoker;
mod policy;
mod registry;
mod table;

pub use connection::{
    ConnectionListener, InstanceConnection, InstanceConnectionService, InstanceMetadata,
    MemoryConnectionService, MemoryInstance, Subscription,
};
pub use error::{ConnectionError, InvokerError, RegistryError};
pub use invoker::{Invoker, RemoteInvoker, RemoteInvokerFactory, TransportInvoker};
pub use policy::{Candidate, LowestLoad, SelectionPolicy};
pub use registry::{InvokerStatus, RemoteInvokerRegistry};
