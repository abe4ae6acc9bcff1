//! Agent 装配
//!
//! 按配置选择 LLM 后端、加载 system prompt、注册 search / write_file 工具、
//! 创建检查点存储，组装出可供 CLI 或其他前端调用的 TurnOrchestrator。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{create_checkpoint_store, AgentError, TurnOrchestrator};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::react::{LlmPlanner, DEFAULT_SYSTEM_PROMPT};
use crate::tools::{ParallelToolExecutor, ToolRegistry, WebSearchTool, WriteFileTool};

/// 根据配置与环境变量选择 LLM 后端：DeepSeek > OpenAI > Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient);
    }

    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(&model)))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}

/// system prompt：配置的文件 > config/prompts/system.txt > 内置调研 prompt
pub fn load_system_prompt(cfg: &AppConfig) -> String {
    if let Some(path) = &cfg.app.system_prompt_path {
        match std::fs::read_to_string(path) {
            Ok(s) => return s,
            Err(e) => tracing::warn!("Failed to read system prompt {:?}: {}", path, e),
        }
    }
    ["config/prompts/system.txt", "../config/prompts/system.txt"]
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// 注册内置工具：search 与 write_file（沙箱在 app.workspace_root）
pub fn create_tool_registry(cfg: &AppConfig) -> Result<ToolRegistry, AgentError> {
    let mut tools = ToolRegistry::new();
    tools.register(WebSearchTool::new(&cfg.tools.search))?;
    tools.register(WriteFileTool::in_dir(&cfg.app.workspace_root))?;
    Ok(tools)
}

/// 按配置组装回合编排器；cancel_token 取消时正在执行的工具调用记为失败
pub async fn build_orchestrator(
    cfg: &AppConfig,
    cancel_token: CancellationToken,
) -> Result<TurnOrchestrator, AgentError> {
    if cfg.app.max_iterations == 0 {
        return Err(AgentError::Config("app.max_iterations must be at least 1".to_string()));
    }

    let llm = create_llm_from_config(cfg);
    let planner = LlmPlanner::new(llm, load_system_prompt(cfg))
        .with_request_timeout(Duration::from_secs(cfg.llm.timeouts.request));

    let registry = Arc::new(create_tool_registry(cfg)?);
    tracing::info!(count = registry.len(), tools = ?registry.tool_names(), "tools registered");
    let executor = ParallelToolExecutor::new(
        registry,
        Duration::from_secs(cfg.tools.tool_timeout_secs),
        cfg.tools.max_concurrent,
    )
    .with_cancel_token(cancel_token);
    let store = create_checkpoint_store(&cfg.checkpoint).await;

    Ok(TurnOrchestrator::new(
        Arc::new(planner),
        executor,
        store,
        cfg.app.max_iterations,
    ))
}
