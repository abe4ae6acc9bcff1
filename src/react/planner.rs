//! Planner：调用 LLM 并把输出解析为最终回答或一批工具调用
//!
//! Planner trait 是外部推理模型的抽象；LlmPlanner 是基于 LlmClient 的默认实现。
//! 调用失败、超时、JSON 格式错误或空批次都作为 AgentError::Planner 返回，不在此处重试。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{Message, ProposedCall, Transcript};
use crate::tools::schema::tool_call_schema_json;
use crate::tools::ToolSpec;

/// 调研智能体的内置 system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a research agent. Your job is to investigate the user's request and write the findings to a report file.
- If answering the request needs a web search, use the search tool.
- Stop searching once you have gathered enough information. Search at most twice.
- Save the report as an HTML file with the write_file tool.
  * If a web search is rejected, stop searching.
  * If saving the report is rejected, do not save it and tell the user the report content instead.";

/// Planner 输出
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerResult {
    /// 直接回复用户，回合结束
    Final(String),
    /// 需要执行的一批工具调用（保持模型给出的顺序）
    ToolCalls(Vec<ProposedCall>),
}

/// 推理协作者：根据对话记录与工具描述给出下一步
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        transcript: &Transcript,
        tools: &[ToolSpec],
    ) -> Result<PlannerResult, AgentError>;
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    #[serde(default)]
    id: Option<String>,
    tool: String,
    #[serde(default)]
    args: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPlan {
    Batch { tool_calls: Vec<RawToolCall> },
    Single(RawToolCall),
}

/// 解析 LLM 输出：含 JSON 时解析为一批 ToolCall（`{"tool_calls": [...]}` 或单个 `{"tool", "args"}`），否则为最终回答
pub fn parse_llm_output(output: &str) -> Result<PlannerResult, AgentError> {
    let trimmed = output.trim();

    // 提取 JSON 块（```json ... ``` 或纯 JSON）
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if trimmed.starts_with('{') {
        trimmed
    } else {
        return Ok(PlannerResult::Final(trimmed.to_string()));
    };

    let parsed: RawPlan = match serde_json::from_str(json_str) {
        Ok(p) => p,
        // 回答里附带的 JSON 示例不是工具调用
        Err(_) if !looks_like_tool_call(json_str) => {
            return Ok(PlannerResult::Final(trimmed.to_string()))
        }
        Err(e) => {
            return Err(AgentError::Planner(format!(
                "malformed tool call JSON: {}: {}",
                e, json_str
            )))
        }
    };

    let raw_calls = match parsed {
        RawPlan::Batch { tool_calls } => tool_calls,
        RawPlan::Single(call) => vec![call],
    };
    if raw_calls.is_empty() {
        return Err(AgentError::Planner("empty tool call batch".to_string()));
    }

    // 缺省 ID 按批内位置生成，同样的输出得到同样的 ID
    let mut used: HashSet<String> = raw_calls
        .iter()
        .filter_map(|raw| raw.id.as_deref())
        .filter(|id| !id.trim().is_empty())
        .map(String::from)
        .collect();
    let calls = raw_calls
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            if raw.tool.trim().is_empty() {
                return Err(AgentError::Planner("tool call without tool name".to_string()));
            }
            let id = match raw.id.filter(|id| !id.trim().is_empty()) {
                Some(id) => id,
                None => positional_id(index, &mut used),
            };
            Ok(ProposedCall {
                id,
                tool: raw.tool,
                args: raw.args,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PlannerResult::ToolCalls(calls))
}

fn positional_id(index: usize, used: &mut HashSet<String>) -> String {
    let mut id = format!("call_{}", index);
    while used.contains(&id) {
        id.push('_');
    }
    used.insert(id.clone());
    id
}

/// 解析失败时判断是否是写坏的工具调用（而不是回答里的 JSON）
fn looks_like_tool_call(json_str: &str) -> bool {
    match serde_json::from_str::<Value>(json_str) {
        Ok(Value::Object(map)) => map.contains_key("tool") || map.contains_key("tool_calls"),
        Ok(_) => false,
        Err(_) => json_str.contains("\"tool\"") || json_str.contains("\"tool_calls\""),
    }
}

/// LlmPlanner：持有 LLM、system prompt 与请求超时
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    request_timeout: Duration,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
            request_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }


    /// system = 基础 prompt + 工具列表 + 调用格式
    fn system_message(&self, tools: &[ToolSpec]) -> Message {
        let tools_json = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());
        Message::system(format!(
            "{}\n\n## Available tools\n{}\n\n## Calling tools\n\
             To call tools, reply with ONLY one JSON object matching this schema \
             (several calls in one reply run in parallel):\n{}\n\
             When you are done, reply with plain text and no JSON.",
            self.system_prompt,
            tools_json,
            tool_call_schema_json()
        ))
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(
        &self,
        transcript: &Transcript,
        tools: &[ToolSpec],
    ) -> Result<PlannerResult, AgentError> {
        let mut messages = vec![self.system_message(tools)];
        messages.extend(transcript.to_messages());

        let output = tokio::time::timeout(self.request_timeout, self.llm.complete(&messages))
            .await
            .map_err(|_| {
                AgentError::Planner(format!(
                    "LLM request timed out after {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(AgentError::Planner)?;

        let (prompt, completion, total) = self.llm.token_usage();
        tracing::debug!(prompt, completion, total, "planner token usage");

        parse_llm_output(&output)
    }
}
