//! 对话记录（Transcript）与工具调用值对象
//!
//! Transcript 只追加、不原地修改；条目不带时间戳，
//! 以保证从检查点恢复后的记录与不中断运行完全一致。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::Message;

/// Planner 提出的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedCall {
    /// 同一规划步内唯一
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ProposedCall {
    pub fn new(id: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            tool: tool.into(),
            args,
        }
    }
}

/// 单次调用的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    ExecutedOk,
    ExecutedError,
    Rejected,
}

/// 一次调用的终态记录：执行成功 / 执行失败 / 被拒绝；创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub call_id: String,
    pub tool: String,
    pub status: OutcomeStatus,
    /// 结果内容、错误详情或拒绝原因
    pub detail: String,
}

impl ExecutionOutcome {
    pub fn ok(call: &ProposedCall, content: impl Into<String>) -> Self {
        Self::with_status(call, OutcomeStatus::ExecutedOk, content)
    }

    pub fn error(call: &ProposedCall, detail: impl Into<String>) -> Self {
        Self::with_status(call, OutcomeStatus::ExecutedError, detail)
    }

    pub fn rejected(call: &ProposedCall, reason: impl Into<String>) -> Self {
        Self::with_status(call, OutcomeStatus::Rejected, reason)
    }

    fn with_status(call: &ProposedCall, status: OutcomeStatus, detail: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.tool.clone(),
            status,
            detail: detail.into(),
        }
    }
}

/// 对话记录条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    User { content: String },
    ToolCalls { batch_id: String, calls: Vec<ProposedCall> },
    ToolOutcome(ExecutionOutcome),
    Final { answer: String },
}

/// 只追加的对话记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(TranscriptEntry::User {
            content: content.into(),
        });
    }

    pub fn extend_outcomes(&mut self, outcomes: impl IntoIterator<Item = ExecutionOutcome>) {
        self.entries
            .extend(outcomes.into_iter().map(TranscriptEntry::ToolOutcome));
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 转为 LLM 消息序列：工具调用以 JSON 形式作为 assistant 消息，结果作为 tool 消息
    pub fn to_messages(&self) -> Vec<Message> {
        self.entries
            .iter()
            .map(|entry| match entry {
                TranscriptEntry::User { content } => Message::user(content.clone()),
                TranscriptEntry::ToolCalls { calls, .. } => {
                    let payload = serde_json::json!({ "tool_calls": calls });
                    Message::assistant(payload.to_string())
                }
                TranscriptEntry::ToolOutcome(outcome) => Message::tool(format!(
                    "[{}] {} {}: {}",
                    outcome.call_id,
                    outcome.tool,
                    status_label(outcome.status),
                    outcome.detail
                )),
                TranscriptEntry::Final { answer } => Message::assistant(answer.clone()),
            })
            .collect()
    }
}

fn status_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::ExecutedOk => "ok",
        OutcomeStatus::ExecutedError => "error",
        OutcomeStatus::Rejected => "rejected",
    }
}
