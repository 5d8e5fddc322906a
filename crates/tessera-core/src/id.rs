//! 租户、实例与节点标识。
//!
//! # 教案式说明
//! - **意图 (Why)**：集群内“一个租户跑在哪些实例上”由 `(InstanceId, TenantId)` 二元组描述，
//!   该二元组即 [`NodeId`]；三者都需要可哈希、可排序、可跨线程廉价克隆。
//! - **契约 (What)**：
//!   - [`TenantId`] 是不透明字符串，本 crate 从不生成它；
//!   - [`InstanceId`] 是 128 位值，全序关系用于负载相同时的确定性打破平局；
//!   - [`NodeId`] 的字符串形式为 `<instance>+<tenant>`，可被 [`str::parse`] 还原。
//! - **风险 (Trade-offs)**：`TenantId` 内部使用 `Arc<str>`，克隆只增加引用计数，但比较仍是按字节比较。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::IdentityError;

/// 租户（应用）标识。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(Arc<str>);

impl TenantId {
    #[must_use]
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// 外部边界上“可能缺失”的租户输入。
///
/// `None` 对应缺失租户，返回 [`IdentityError::MissingTenant`]；任意 `Some`（包括空串）均合法。
impl TryFrom<Option<&str>> for TenantId {
    type Error = IdentityError;

    fn try_from(value: Option<&str>) -> Result<Self, Self::Error> {
        value.map(Self::from).ok_or(IdentityError::MissingTenant)
    }
}

/// 集群实例标识。
///
/// 排序与 `u128` 数值序一致（UUID 按大端字节比较）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(Uuid);

impl InstanceId {
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0.as_u128()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for InstanceId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hyphenated(s)
            .map(Self)
            .ok_or_else(|| IdentityError::InvalidInstanceId {
                input: s.to_owned(),
            })
    }
}

/// 逻辑节点：某租户在某实例上的一个落点。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    instance: InstanceId,
    tenant: TenantId,
}

impl NodeId {
    #[must_use]
    pub fn new(instance: InstanceId, tenant: TenantId) -> Self {
        Self { instance, tenant }
    }

    #[must_use]
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.instance, self.tenant)
    }
}

impl FromStr for NodeId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentityError::InvalidNodeId {
            input: s.to_owned(),
        };
        // 实例部分是十六进制，不含 `+`，因此第一个 `+` 就是分隔符；租户部分可以包含 `+`。
        let (instance, tenant) = s.split_once('+').ok_or_else(invalid)?;
        let instance = instance.parse::<InstanceId>().map_err(|_| invalid())?;
        Ok(Self::new(instance, TenantId::from(tenant)))
    }
}

/// 只接受 8-4-4-4-12 连字符形式；`uuid` 同时接受的简写、花括号与 URN 形式在此被拒绝。
pub(crate) fn parse_hyphenated(input: &str) -> Option<Uuid> {
    if input.len() != uuid::fmt::Hyphenated::LENGTH {
        return None;
    }
    Uuid::try_parse(input).ok()
}
