//! 路由标识属性测试。
//!
//! # 教案级导览
//!
//! - **Why**：路由器与租户工作端从不交换注册信息，双方只靠同一个纯函数对齐地址；
//!   一旦推导不稳定或发生碰撞，请求会被投递到错误租户。
//! - **How**：使用 `proptest` 生成任意 Unicode 租户名，分别校验确定性、区分度与地址纯度。
//! - **What**：所有断言只依赖公开 API，不读取任何内部状态。

use proptest::prelude::*;
use tessera_core::{RouteAddress, RouteId, RouteIdentity, TenantId, route_identifier_for};

proptest! {
    /// 相同租户在任意次调用中得到相同标识与相同地址。
    #[test]
    fn identifier_is_deterministic(tenant in any::<String>()) {
        let tenant = TenantId::from(tenant);
        let identity = RouteIdentity::default();
        prop_assert_eq!(route_identifier_for(&tenant), route_identifier_for(&tenant.clone()));
        prop_assert_eq!(
            identity.address_for_tenant(&tenant).to_string(),
            identity.address_for(route_identifier_for(&tenant)).to_string()
        );
    }

    /// 不同租户名得到不同标识。
    #[test]
    fn distinct_tenants_get_distinct_identifiers(left in ".{0,32}", right in ".{0,32}") {
        prop_assume!(left != right);
        prop_assert_ne!(
            route_identifier_for(&TenantId::from(left)),
            route_identifier_for(&TenantId::from(right))
        );
    }

    /// 规范字符串与地址均可无损解析回同一个标识。
    #[test]
    fn canonical_forms_parse_back(tenant in any::<String>(), scheme in "[a-z][a-z0-9+.-]{0,8}") {
        let route = route_identifier_for(&TenantId::from(tenant));
        let text = route.to_string();
        prop_assert_eq!(text.len(), 36);
        prop_assert!(text.chars().all(|c| c == '-' || c.is_ascii_digit() || ('a'..='f').contains(&c)));
        prop_assert_eq!(text.parse::<RouteId>().expect("规范形式必须可解析"), route);

        let address = RouteIdentity::new(scheme.as_str()).address_for(route);
        let expected = format!("{scheme}://route-{text}");
        prop_assert_eq!(address.to_string(), expected.clone());
        prop_assert_eq!(RouteAddress::parse(&expected).expect("地址必须可解析").route(), route);
    }
}

/// 已知输入的标识在版本间保持不变，防止摘要输入被意外修改。
#[test]
fn identifier_is_stable_across_builds() {
    let first = route_identifier_for(&TenantId::from("acme")).to_string();
    let again = RouteIdentity::new("tcp")
        .route_identifier_for(&TenantId::from("acme"))
        .to_string();
    assert_eq!(first, again);
    assert_eq!(&first[14..15], "8", "版本位必须为 8");
}
