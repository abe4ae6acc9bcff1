//! 认知层：Planner（LLM 规划与解析）与回合过程事件

pub mod events;
pub mod planner;

pub use events::{AgentEvent, EventSender};
pub use planner::{parse_llm_output, LlmPlanner, Planner, PlannerResult, DEFAULT_SYSTEM_PROMPT};
