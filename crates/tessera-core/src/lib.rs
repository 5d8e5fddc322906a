#![deny(unsafe_code)]
#![doc = "tessera-core: 多租户路由运行时的标识、信封与配置契约。"]
#![doc = ""]
#![doc = "本 crate 不持有任何线程或套接字，只提供被 `tessera-router` 与 `tessera-registry` 共同依赖的纯数据契约："]
#![doc = "租户/实例/节点标识、由租户推导的路由标识与地址、多帧信封、错误分类以及配置与日志初始化。"]

pub mod config;
pub mod envelope;
pub mod error;
pub mod id;
pub mod route;
pub mod telemetry;

pub use config::{RegistrySettings, RouterSettings, TcpSettings, TesseraConfig};
pub use envelope::Envelope;
pub use error::{ConfigError, EnvelopeError, ErrorCategory, IdentityError};
pub use id::{InstanceId, NodeId, TenantId};
pub use route::{RouteAddress, RouteId, RouteIdentity, route_identifier_for};
