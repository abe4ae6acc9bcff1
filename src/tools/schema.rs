//! 工具调用 JSON Schema 生成（schemars）
//!
//! args_schema 为工具参数结构体生成 parameters_schema；
//! tool_call_schema_json 描述 Planner 期望的批量调用格式，拼入 system prompt。

use schemars::{schema_for, JsonSchema};
use serde_json::{Map, Value};

/// 批量工具调用格式：`{"tool_calls": [{"id": "...", "tool": "...", "args": {...}}]}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallsFormat {
    pub tool_calls: Vec<ToolCallFormat>,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 调用 ID，可省略，由 Planner 补全
    pub id: Option<String>,
    /// 工具名，如 search、write_file
    pub tool: String,
    pub args: Map<String, Value>,
}

/// 为参数结构体生成 JSON Schema
pub fn args_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {}, "required": [] })
    })
}

pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallsFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 从 schema 中读取 `required` 字段列表
pub fn required_fields(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Args {
        query: String,
        limit: Option<u32>,
    }

    #[test]
    fn test_required_fields_from_struct() {
        let schema = args_schema::<Args>();
        assert_eq!(required_fields(&schema), vec!["query"]);
    }

    #[test]
    fn test_tool_call_schema_mentions_tool_calls() {
        assert!(tool_call_schema_json().contains("tool_calls"));
    }
}
