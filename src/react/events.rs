//! 回合过程事件：规划、挂起审批、恢复、工具执行、结束，按发生顺序推送给调用方

use serde::Serialize;

use crate::core::ApprovalRequest;
use crate::memory::ExecutionOutcome;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 开始第 iteration 次规划
    PlanningStarted {
        iteration: usize,
        max_iterations: usize,
    },
    /// 挂起：等待对整批调用的人工决策
    ApprovalRequested {
        batch_id: String,
        requests: Vec<ApprovalRequest>,
    },
    /// 决策已应用，回合继续
    Resumed {
        batch_id: String,
        approved: usize,
        rejected: usize,
    },
    ToolExecutionStarted { call_ids: Vec<String> },
    /// 本批次全部结果（含被拒绝的调用），按原调用顺序
    ToolExecutionFinished { outcomes: Vec<ExecutionOutcome> },
    TurnFinished { answer: String },
    TurnFailed { error: String },
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<AgentEvent>;

pub(crate) fn send_event(tx: Option<&EventSender>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
