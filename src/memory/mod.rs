//! 记忆层：LLM 消息与只追加的对话记录

pub mod conversation;
pub mod transcript;

pub use conversation::{Message, Role};
pub use transcript::{ExecutionOutcome, OutcomeStatus, ProposedCall, Transcript, TranscriptEntry};
