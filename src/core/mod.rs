//! 核心编排层：错误、审批请求与审批门、会话检查点、回合编排

pub mod approval;
pub mod checkpoint;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod state;

pub use approval::{ApprovalDecision, ApprovalRequest, ApprovalRequestBuilder, Verdict};
#[cfg(feature = "async-sqlite")]
pub use checkpoint::SqliteCheckpointStore;
pub use checkpoint::{
    create_checkpoint_store, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
pub use error::AgentError;
pub use gate::{ApprovalGate, GateResolution, GateState, DEFAULT_REJECTION_REASON};
pub use orchestrator::{new_session_id, TurnOrchestrator, TurnStatus};
pub use state::{SessionCheckpoint, TurnPhase};
