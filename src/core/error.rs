//! Agent 错误类型
//!
//! 协议类错误（校验、审批门）只中止触发它的那次调用，同步返回给调用方；
//! 单个工具失败不会出现在这里，而是被吸收为 ExecutedError 结果。

use thiserror::Error;

use crate::memory::Transcript;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 工具调用引用了未知工具或参数不合法（在挂起之前拒绝）
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 决策集合的 call id 与待审批批次不完全一致；不做部分应用
    #[error("Decision set does not match pending batch (expected {expected:?}, received {received:?})")]
    DecisionMismatch {
        expected: Vec<String>,
        received: Vec<String>,
    },

    #[error("Batch already resolved: {batch_id}")]
    AlreadyResolved { batch_id: String },

    #[error("No approval batch is awaiting decisions")]
    GateNotSuspended,

    #[error("Session {0} is awaiting approval decisions")]
    SessionSuspended(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Planner error: {0}")]
    Planner(String),

    /// 超过最大规划轮数；附带截至此时的完整对话记录
    #[error("Max iterations exceeded ({limit})")]
    MaxIterationsExceeded {
        limit: usize,
        transcript: Box<Transcript>,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 审批协议违规：调用方修正决策后可重试
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            AgentError::Validation(_)
                | AgentError::DecisionMismatch { .. }
                | AgentError::AlreadyResolved { .. }
                | AgentError::GateNotSuspended
                | AgentError::SessionSuspended(_)
        )
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Checkpoint(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors() {
        assert!(AgentError::GateNotSuspended.is_protocol_error());
        assert!(AgentError::SessionSuspended("s1".to_string()).is_protocol_error());
        assert!(AgentError::AlreadyResolved {
            batch_id: "batch-1-1".to_string()
        }
        .is_protocol_error());
        assert!(!AgentError::Checkpoint("disk full".to_string()).is_protocol_error());
        assert!(!AgentError::Planner("bad output".to_string()).is_protocol_error());
    }
}
