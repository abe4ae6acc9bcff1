//! 审批请求与人工决策
//!
//! ApprovalRequestBuilder 把 Planner 产出的一批调用一对一、保序地转换为不可变的 ApprovalRequest；
//! 引用未知工具、缺少必填参数或 call id 重复时立即失败，绝不为无法执行的调用发起审批。

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::memory::ProposedCall;
use crate::tools::schema::required_fields;
use crate::tools::ToolRegistry;

/// 单个调用的审批请求（值对象，创建后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub call_id: String,
    pub tool: String,
    pub args: Map<String, Value>,
    /// 人类可读的预览
    pub preview: String,
    /// 在批次中的位置（从 0 开始）
    pub ordinal: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
}

/// 人工对单个调用的决策
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub call_id: String,
    pub verdict: Verdict,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ApprovalDecision {
    pub fn approve(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            verdict: Verdict::Approved,
            reason: None,
        }
    }

    pub fn reject(call_id: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            call_id: call_id.into(),
            verdict: Verdict::Rejected,
            reason,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Approved
    }
}

/// 审批请求构建器：依赖注册表校验工具名与必填参数，预览由工具自身生成
#[derive(Clone)]
pub struct ApprovalRequestBuilder {
    registry: Arc<ToolRegistry>,
}

impl ApprovalRequestBuilder {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn build(&self, calls: &[ProposedCall]) -> Result<Vec<ApprovalRequest>, AgentError> {
        let mut seen = HashSet::new();
        calls
            .iter()
            .enumerate()
            .map(|(ordinal, call)| {
                if call.id.trim().is_empty() {
                    return Err(AgentError::Validation(format!(
                        "call #{ordinal} ({}) has an empty call id",
                        call.tool
                    )));
                }
                if !seen.insert(call.id.as_str()) {
                    return Err(AgentError::Validation(format!(
                        "duplicate call id in batch: {}",
                        call.id
                    )));
                }
                let tool = self.registry.resolve(&call.tool).map_err(|_| {
                    AgentError::Validation(format!(
                        "call {} references unknown tool '{}'",
                        call.id, call.tool
                    ))
                })?;
                let schema = tool.parameters_schema();
                let missing: Vec<_> = required_fields(&schema)
                    .into_iter()
                    .filter(|field| !call.args.contains_key(*field))
                    .collect();
                if !missing.is_empty() {
                    return Err(AgentError::Validation(format!(
                        "call {} ({}) is missing required argument(s): {}",
                        call.id,
                        call.tool,
                        missing.join(", ")
                    )));
                }
                Ok(ApprovalRequest {
                    call_id: call.id.clone(),
                    tool: call.tool.clone(),
                    args: call.args.clone(),
                    preview: tool.preview(&call.args),
                    ordinal,
                })
            })
            .collect()
    }
}
