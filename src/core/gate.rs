//! 审批门：挂起 / 恢复状态机
//!
//! PlanningDone -> AwaitingDecisions -> Resolved。每个批次一个实例，Resolved 为终态。
//! 恢复时决策集合的 call id 必须与批次完全相等，否则整体拒绝、不产生任何结果；
//! 被拒绝的调用直接生成 Rejected 结果，不经过执行器。
//! 状态可序列化，随 SessionCheckpoint 持久化，因此挂起可以跨进程重启。

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::{AgentError, ApprovalDecision, ApprovalRequest};
use crate::memory::{ExecutionOutcome, ProposedCall};

/// 用户未给出原因时的默认拒绝说明
pub const DEFAULT_REJECTION_REASON: &str =
    "Tool use was rejected by the user. Stop this action and report to the user.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    PlanningDone,
    AwaitingDecisions,
    Resolved,
}

/// 恢复结果：待执行的已批准子集 + 已物化的拒绝结果（均保持批次原顺序）
#[derive(Debug, Clone, PartialEq)]
pub struct GateResolution {
    pub approved: Vec<ProposedCall>,
    pub rejected: Vec<ExecutionOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalGate {
    batch_id: String,
    calls: Vec<ProposedCall>,
    requests: Vec<ApprovalRequest>,
    state: GateState,
}

impl ApprovalGate {
    pub fn new(
        batch_id: impl Into<String>,
        calls: Vec<ProposedCall>,
        requests: Vec<ApprovalRequest>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            calls,
            requests,
            state: GateState::PlanningDone,
        }
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn calls(&self) -> &[ProposedCall] {
        &self.calls
    }

    pub fn requests(&self) -> &[ApprovalRequest] {
        &self.requests
    }

    pub fn is_awaiting(&self) -> bool {
        self.state == GateState::AwaitingDecisions
    }

    /// 进入 AwaitingDecisions，返回需要展示给调用方的完整请求批次
    pub fn suspend(&mut self) -> Result<&[ApprovalRequest], AgentError> {
        if self.state != GateState::PlanningDone {
            return Err(AgentError::GateNotSuspended);
        }
        self.state = GateState::AwaitingDecisions;
        tracing::info!(
            batch_id = %self.batch_id,
            pending = self.requests.len(),
            "approval gate suspended"
        );
        Ok(&self.requests)
    }

    /// 应用决策集合；失败时状态不变
    pub fn resolve(
        &mut self,
        decisions: &[ApprovalDecision],
    ) -> Result<GateResolution, AgentError> {
        match self.state {
            GateState::Resolved => {
                return Err(AgentError::AlreadyResolved {
                    batch_id: self.batch_id.clone(),
                })
            }
            GateState::PlanningDone => return Err(AgentError::GateNotSuspended),
            GateState::AwaitingDecisions => {}
        }

        let by_id: HashMap<&str, &ApprovalDecision> =
            decisions.iter().map(|d| (d.call_id.as_str(), d)).collect();
        let expected: HashSet<&str> = self.calls.iter().map(|c| c.id.as_str()).collect();
        let received: HashSet<&str> = by_id.keys().copied().collect();
        // 重复的 call id 会让 by_id 短于 decisions，同样视为不匹配
        if by_id.len() != decisions.len() || expected != received {
            return Err(AgentError::DecisionMismatch {
                expected: self.calls.iter().map(|c| c.id.clone()).collect(),
                received: decisions.iter().map(|d| d.call_id.clone()).collect(),
            });
        }

        let mut approved = Vec::new();
        let mut rejected = Vec::new();
        for call in &self.calls {
            let decision = by_id[call.id.as_str()];
            if decision.is_approved() {
                approved.push(call.clone());
            } else {
                let reason = decision
                    .reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .unwrap_or(DEFAULT_REJECTION_REASON);
                rejected.push(ExecutionOutcome::rejected(call, reason));
            }
        }

        self.state = GateState::Resolved;
        tracing::info!(
            batch_id = %self.batch_id,
            approved = approved.len(),
            rejected = rejected.len(),
            "approval gate resolved"
        );
        Ok(GateResolution { approved, rejected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::OutcomeStatus;
    use serde_json::json;

    fn open_gate(ids: &[&str]) -> ApprovalGate {
        let calls: Vec<_> = ids
            .iter()
            .map(|id| ProposedCall::new(*id, "search", json!({"query": id})))
            .collect();
        let requests = calls
            .iter()
            .enumerate()
            .map(|(i, c)| ApprovalRequest {
                call_id: c.id.clone(),
                tool: c.tool.clone(),
                args: c.args.clone(),
                preview: String::new(),
                ordinal: i,
            })
            .collect();
        let mut gate = ApprovalGate::new("batch-1", calls, requests);
        gate.suspend().unwrap();
        gate
    }

    #[test]
    fn test_resolve_partitions_in_order() {
        let mut gate = open_gate(&["a", "b", "c"]);
        let res = gate
            .resolve(&[
                ApprovalDecision::reject("b", Some("not now".to_string())),
                ApprovalDecision::approve("c"),
                ApprovalDecision::approve("a"),
            ])
            .unwrap();
        let approved: Vec<_> = res.approved.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(approved, vec!["a", "c"]);
        assert_eq!(res.rejected.len(), 1);
        assert_eq!(res.rejected[0].call_id, "b");
        assert_eq!(res.rejected[0].status, OutcomeStatus::Rejected);
        assert_eq!(res.rejected[0].detail, "not now");
        assert_eq!(gate.state(), GateState::Resolved);
    }

    #[test]
    fn test_default_rejection_reason() {
        let mut gate = open_gate(&["a"]);
        let res = gate
            .resolve(&[ApprovalDecision::reject("a", Some("  ".to_string()))])
            .unwrap();
        assert_eq!(res.rejected[0].detail, DEFAULT_REJECTION_REASON);
    }

    #[test]
    fn test_mismatched_sets_are_rejected_outright() {
        let cases: Vec<Vec<ApprovalDecision>> = vec![
            vec![ApprovalDecision::approve("a")],
            vec![
                ApprovalDecision::approve("a"),
                ApprovalDecision::approve("b"),
                ApprovalDecision::approve("x"),
            ],
            vec![ApprovalDecision::approve("x"), ApprovalDecision::approve("y")],
            vec![ApprovalDecision::approve("a"), ApprovalDecision::approve("a")],
            vec![],
        ];
        for decisions in cases {
            let mut gate = open_gate(&["a", "b"]);
            let err = gate.resolve(&decisions).unwrap_err();
            assert!(matches!(err, AgentError::DecisionMismatch { .. }));
            assert_eq!(gate.state(), GateState::AwaitingDecisions);
        }
    }

    #[test]
    fn test_mismatch_then_valid_resolve() {
        let mut gate = open_gate(&["a", "b"]);
        assert!(gate.resolve(&[ApprovalDecision::approve("a")]).is_err());
        let res = gate
            .resolve(&[ApprovalDecision::approve("a"), ApprovalDecision::approve("b")])
            .unwrap();
        assert_eq!(res.approved.len() + res.rejected.len(), 2);
    }

    #[test]
    fn test_second_resolve_fails() {
        let mut gate = open_gate(&["a"]);
        let first = gate.resolve(&[ApprovalDecision::approve("a")]).unwrap();
        let err = gate.resolve(&[ApprovalDecision::approve("a")]).unwrap_err();
        assert!(matches!(err, AgentError::AlreadyResolved { batch_id } if batch_id == "batch-1"));
        assert_eq!(first.approved.len(), 1);
        assert_eq!(gate.state(), GateState::Resolved);
    }

    #[test]
    fn test_resolve_before_suspend() {
        let mut gate = ApprovalGate::new("b", vec![], vec![]);
        assert!(matches!(gate.resolve(&[]), Err(AgentError::GateNotSuspended)));
        gate.suspend().unwrap();
        assert!(matches!(gate.suspend(), Err(AgentError::GateNotSuspended)));
    }

    #[test]
    fn test_gate_survives_serialization() {
        let gate = open_gate(&["a", "b"]);
        let json = serde_json::to_string(&gate).unwrap();
        let mut restored: ApprovalGate = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, gate);
        assert!(restored.is_awaiting());
        let res = restored
            .resolve(&[ApprovalDecision::approve("a"), ApprovalDecision::reject("b", None)])
            .unwrap();
        assert_eq!(res.approved[0].id, "a");
        assert_eq!(res.rejected[0].call_id, "b");
    }
}
