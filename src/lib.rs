//! Scout - 人工审批的 Rust 调研智能体
//!
//! 模块划分：
//! - **agent**: 按配置装配 LLM、工具、检查点存储与回合编排器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 审批请求、审批门、会话检查点、回合编排
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: LLM 消息与只追加的对话记录
//! - **react**: Planner 与过程事件
//! - **tools**: 工具注册表、并行执行器、search 与 write_file

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::build_orchestrator;
pub use core::{AgentError, ApprovalDecision, TurnOrchestrator, TurnStatus};
