//! 会话检查点：恢复一个回合所需的最小状态
//!
//! 在每个挂起点、审批门解决后以及最终返回前持久化；按 session id 恢复，后写覆盖前写。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{ApprovalGate, ApprovalRequest};
use crate::memory::Transcript;

/// 回合阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Planning,
    AwaitingDecisions,
    Executing,
    Finished,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub session_id: String,
    pub transcript: Transcript,
    /// 最近一个批次的审批门；Resolved 状态也保留，用于拒绝重复恢复
    pub gate: Option<ApprovalGate>,
    /// 当前回合已发起的规划次数
    pub iteration: usize,
    pub phase: TurnPhase,
    pub updated_at: DateTime<Utc>,
}

impl SessionCheckpoint {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            transcript: Transcript::new(),
            gate: None,
            iteration: 0,
            phase: TurnPhase::Planning,
            updated_at: Utc::now(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.phase == TurnPhase::AwaitingDecisions
            && self.gate.as_ref().map(|g| g.is_awaiting()).unwrap_or(false)
    }

    /// 挂起时待审批的请求
    pub fn pending_requests(&self) -> Option<&[ApprovalRequest]> {
        self.gate
            .as_ref()
            .filter(|g| g.is_awaiting())
            .map(|g| g.requests())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
