//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 最后一条消息是用户输入时，提议用该输入作为 query 执行 search；
//! 最后一条是工具结果时，直接给出最终回答。

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last = messages.iter().rev().find(|m| m.role != Role::System);
        match last {
            Some(m) if m.role == Role::User => Ok(serde_json::json!({
                "tool_calls": [{ "tool": "search", "args": { "query": m.content } }]
            })
            .to_string()),
            Some(m) if m.role == Role::Tool => {
                Ok(format!("Mock summary of tool results: {}", m.content))
            }
            Some(m) => Ok(m.content.clone()),
            None => Ok("(no input)".to_string()),
        }
    }
}
