//! 候选调用器的排序策略。

use std::cmp::Ordering;
use std::fmt;

use tessera_core::NodeId;

/// 参与选择的一个候选节点。
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub node: &'a NodeId,
    /// 承载实例最近一次上报的负载。
    pub load: f64,
}

/// 决定候选顺序的可插拔策略；排在最前的候选即“最佳”。
///
/// # 教案式说明
/// - **意图 (Why)**：负载的取值范围与衰减方式由实例侧定义，注册表只负责比较，
///   比较方式因部署而异，因此以策略对象注入；
/// - **契约 (What)**：`compare` 必须是全序，且对相同输入给出相同结果，
///   否则“最佳”与“全部”的顺序在两次调用之间不可预测；
/// - **风险 (Trade-offs)**：负载快照异步更新，同一租户连续两次选择可能落在不同实例上。
pub trait SelectionPolicy: Send + Sync + fmt::Debug {
    fn compare(&self, left: &Candidate<'_>, right: &Candidate<'_>) -> Ordering;
}

/// 负载最低者优先，负载相同时按实例标识升序。
///
/// 任意符号的 `NaN` 都排在所有正常值之后；其余负载用 [`f64::total_cmp`] 比较。
#[derive(Clone, Copy, Debug, Default)]
pub struct LowestLoad;

impl SelectionPolicy for LowestLoad {
    fn compare(&self, left: &Candidate<'_>, right: &Candidate<'_>) -> Ordering {
        left.load
            .is_nan()
            .cmp(&right.load.is_nan())
            .then_with(|| left.load.total_cmp(&right.load))
            .then_with(|| left.node.instance().cmp(&right.node.instance()))
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::{InstanceId, TenantId};

    use super::*;

    fn node(instance: u128) -> NodeId {
        NodeId::new(InstanceId::from_u128(instance), TenantId::from("acme"))
    }

    #[test]
    fn lower_load_wins_and_ties_break_by_instance() {
        let (a, b, c) = (node(1), node(2), node(3));
        let mut candidates = [
            Candidate { node: &c, load: 0.2 },
            Candidate { node: &a, load: 0.8 },
            Candidate { node: &b, load: 0.2 },
        ];
        candidates.sort_by(|left, right| LowestLoad.compare(left, right));
        let order: Vec<u128> = candidates
            .iter()
            .map(|candidate| candidate.node.instance().as_u128())
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn nan_load_sorts_last() {
        let (a, b) = (node(1), node(2));
        let healthy = Candidate { node: &b, load: 10.0 };
        let unknown = Candidate {
            node: &a,
            load: f64::NAN,
        };
        assert_eq!(LowestLoad.compare(&healthy, &unknown), Ordering::Less);

        // 0.0 / 0.0 在常见平台上得到符号位为 1 的 NaN。
        let negative = Candidate {
            node: &a,
            load: -f64::NAN,
        };
        assert_eq!(LowestLoad.compare(&healthy, &negative), Ordering::Less);
        assert_eq!(LowestLoad.compare(&negative, &healthy), Ordering::Greater);
        let idle = Candidate { node: &b, load: -1.0 };
        assert_eq!(LowestLoad.compare(&idle, &negative), Ordering::Less);
    }
}
