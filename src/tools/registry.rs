//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / preview / execute），
//! 由 ToolRegistry 按注册顺序保存，按名解析；describe_all 的顺序即注册顺序，保证 prompt 可复现。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、审批预览、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（注册表内唯一）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；`required` 中列出的字段在构建审批请求时校验
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 供人工审批展示的预览文本；必须是参数的纯函数
    fn preview(&self, args: &Map<String, Value>) -> String {
        let mut out = format!("Tool: {}\nArguments:\n", self.name());
        for (key, value) in args {
            match value {
                Value::String(s) => out.push_str(&format!("  {key}: {s}\n")),
                other => out.push_str(&format!("  {key}: {other}\n")),
            }
        }
        out
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具描述的可序列化投影，交给 Planner 生成 prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具注册表：保持注册顺序，名称到下标的索引用于解析
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, AgentError> {
        self.index
            .get(name)
            .map(|&i| self.tools[i].clone())
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// 按注册顺序返回全部工具描述
    pub fn describe_all(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("search")).unwrap();
        let err = registry.register(NamedTool("search")).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(name) if name == "search"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.resolve("nope"),
            Err(AgentError::UnknownTool(_))
        ));
    }

    #[test]
    fn test_describe_all_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["write_file", "search", "alpha", "zeta"] {
            registry.register(NamedTool(name)).unwrap();
        }
        let names: Vec<_> = registry.describe_all().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["write_file", "search", "alpha", "zeta"]);
        assert_eq!(registry.tool_names(), names);
    }

    #[tokio::test]
    async fn test_resolve_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("search")).unwrap();
        let tool = registry.resolve("search").unwrap();
        assert_eq!(tool.execute(Value::Null).await.unwrap(), "search");
    }

    #[test]
    fn test_default_preview() {
        let tool = NamedTool("search");
        let mut args = Map::new();
        args.insert("query".to_string(), Value::String("weather".to_string()));
        args.insert("limit".to_string(), serde_json::json!(2));
        let preview = tool.preview(&args);
        assert!(preview.starts_with("Tool: search"));
        assert!(preview.contains("query: weather"));
        assert!(preview.contains("limit: 2"));
    }
}
