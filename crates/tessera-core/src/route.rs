//! # route 模块说明
//!
//! ## 角色定位（Why）
//! - 路由器与租户工作端之间不做任何注册握手：双方各自用同一个纯函数从租户名推导出
//!   [`RouteId`]，再由 [`RouteIdentity`] 拼出内部端点地址，天然在所有进程、所有实例上一致；
//! - 客户端把 16 字节的 `RouteId` 放进信封，路由器据此找到后端，无需理解租户名本身。
//!
//! ## 设计要求（What）
//! - `route_identifier_for` 是全函数：任意租户字符串都得到一个值，且对相同输入永远得到相同输出；
//! - 不同租户名得到不同标识的概率等同于 SHA-256 截断到 122 位有效位后的碰撞概率；
//! - 地址形式固定为 `<scheme>://route-<canonical id>`，scheme 由传输层决定，作为
//!   [`RouteIdentity`] 的字段传递，而不是进程级全局量。
//!
//! ## 实现策略（How）
//! - 摘要输入为命名空间前缀加租户 UTF-8 字节，取前 16 字节交给 [`Uuid::new_v8`]，
//!   由其写入 RFC 9562 第 8 版的版本/变体位，字符串形式与常见 UUID 工具兼容。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{EnvelopeError, IdentityError};
use crate::id::{TenantId, parse_hyphenated};

const ROUTE_NAMESPACE: &[u8] = b"tessera.route.v1\0";

/// 默认路由地址 scheme：同进程传输。
pub const DEFAULT_ROUTE_SCHEME: &str = "inproc";

const ROUTE_PREFIX: &str = "route-";

/// 由租户推导的 128 位路由标识。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(Uuid);

impl RouteId {
    /// 线上帧宽度。
    pub const LEN: usize = 16;

    #[must_use]
    pub fn for_tenant(tenant: &TenantId) -> Self {
        let digest = Sha256::new()
            .chain_update(ROUTE_NAMESPACE)
            .chain_update(tenant.as_str().as_bytes())
            .finalize();
        let mut bytes = [0_u8; Self::LEN];
        bytes.copy_from_slice(&digest[..Self::LEN]);
        Self(Uuid::new_v8(bytes))
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// 从信封中的路由帧解析标识。
    ///
    /// # Errors
    /// 帧长度不是 [`RouteId::LEN`] 时返回 [`EnvelopeError::InvalidRouteFrame`]。
    pub fn from_frame(frame: &[u8]) -> Result<Self, EnvelopeError> {
        let bytes: [u8; 16] = frame
            .try_into()
            .map_err(|_| EnvelopeError::InvalidRouteFrame { len: frame.len() })?;
        Ok(Self::from_bytes(bytes))
    }

    /// 编码为可直接放入信封的帧。
    #[must_use]
    pub fn to_frame(&self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_bytes())
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl fmt::Debug for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteId({self})")
    }
}

impl FromStr for RouteId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hyphenated(s)
            .map(Self)
            .ok_or_else(|| IdentityError::InvalidRouteId {
                input: s.to_owned(),
            })
    }
}

/// 租户 → 路由标识。纯函数，可在任意线程、任意进程调用。
#[must_use]
pub fn route_identifier_for(tenant: &TenantId) -> RouteId {
    RouteId::for_tenant(tenant)
}

/// 内部端点地址：`<scheme>://route-<RouteId>`。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouteAddress {
    scheme: Arc<str>,
    route: RouteId,
}

impl RouteAddress {
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn route(&self) -> RouteId {
        self.route
    }

    /// 解析 `<scheme>://route-<id>` 字符串。
    ///
    /// # Errors
    /// 缺少 `://`、scheme 为空、缺少 `route-` 前缀或标识非法时返回
    /// [`IdentityError::InvalidRouteAddress`]。
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let invalid = || IdentityError::InvalidRouteAddress {
            input: input.to_owned(),
        };
        let (scheme, rest) = input.split_once("://").ok_or_else(invalid)?;
        if scheme.is_empty() {
            return Err(invalid());
        }
        let id = rest.strip_prefix(ROUTE_PREFIX).ok_or_else(invalid)?;
        let route = id.parse::<RouteId>().map_err(|_| invalid())?;
        Ok(Self {
            scheme: Arc::from(scheme),
            route,
        })
    }
}

impl fmt::Display for RouteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, ROUTE_PREFIX, self.route)
    }
}

/// 绑定了传输 scheme 的路由标识策略。
///
/// # 教案式说明
/// - **意图 (Why)**：同一运行时可能同时跑 `inproc` 与 `tcp` 两种内部端点，scheme 必须随调用方走，
///   不能写死在全局状态里；
/// - **契约 (What)**：`address_for` 只依赖 `(scheme, route)`，对相同输入永远返回相同地址；
/// - **执行逻辑 (How)**：scheme 以 `Arc<str>` 持有，生成地址时只克隆引用。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteIdentity {
    scheme: Arc<str>,
}

impl Default for RouteIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTE_SCHEME)
    }
}

impl RouteIdentity {
    #[must_use]
    pub fn new(scheme: impl Into<Arc<str>>) -> Self {
        Self {
            scheme: scheme.into(),
        }
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn route_identifier_for(&self, tenant: &TenantId) -> RouteId {
        route_identifier_for(tenant)
    }

    #[must_use]
    pub fn address_for(&self, route: RouteId) -> RouteAddress {
        RouteAddress {
            scheme: Arc::clone(&self.scheme),
            route,
        }
    }

    #[must_use]
    pub fn address_for_tenant(&self, tenant: &TenantId) -> RouteAddress {
        self.address_for(route_identifier_for(tenant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_stable_for_same_tenant() {
        let first = route_identifier_for(&TenantId::from("acme"));
        let second = route_identifier_for(&TenantId::from("acme"));
        assert_eq!(first, second, "相同租户必须得到相同标识");
        assert_ne!(first, route_identifier_for(&TenantId::from("globex")));
    }

    #[test]
    fn identifier_carries_version_and_variant_bits() {
        let route = route_identifier_for(&TenantId::from(""));
        assert_eq!(route.as_bytes()[6] >> 4, 0x8);
        assert_eq!(route.as_bytes()[8] >> 6, 0b10);
        assert_eq!(route.as_uuid().get_version_num(), 8);
        assert_eq!(route.as_uuid().get_variant(), uuid::Variant::RFC4122);
    }

    #[test]
    fn address_has_scheme_and_route_prefix() {
        let identity = RouteIdentity::new("tcp");
        let tenant = TenantId::from("acme");
        let address = identity.address_for_tenant(&tenant);
        let rendered = address.to_string();
        assert!(rendered.starts_with("tcp://route-"), "地址前缀不符: {rendered}");
        assert_eq!(rendered.len(), "tcp://route-".len() + 36);
        assert_eq!(RouteAddress::parse(&rendered).expect("地址应可解析"), address);
    }

    #[test]
    fn frame_of_wrong_width_is_rejected() {
        assert_eq!(
            RouteId::from_frame(&[0_u8; 15]),
            Err(EnvelopeError::InvalidRouteFrame { len: 15 })
        );
        let route = route_identifier_for(&TenantId::from("acme"));
        assert_eq!(RouteId::from_frame(&route.to_frame()), Ok(route));
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for input in [
            "inproc//route-00000000-0000-0000-0000-000000000000",
            "://route-00000000-0000-0000-0000-000000000000",
            "inproc://00000000-0000-0000-0000-000000000000",
            "inproc://route-xyz",
        ] {
            assert!(RouteAddress::parse(input).is_err(), "应拒绝 {input}");
        }
    }
}
