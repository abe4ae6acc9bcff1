//! 回合编排器
//!
//! 驱动 规划 -> 审批 -> 执行 -> 再规划 的循环，持有对话记录与检查点：
//! - start_turn：追加用户输入并规划；产出工具调用时在审批门挂起并持久化检查点后返回
//! - resume：可能在另一次进程中调用，只凭 session id 从检查点恢复，应用决策、执行已批准子集，
//!   按原调用顺序合并结果后继续规划
//! 挂起只发生在审批门；单回合规划次数受 max_iterations 限制。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::{
    AgentError, ApprovalDecision, ApprovalGate, ApprovalRequest, ApprovalRequestBuilder,
    CheckpointStore, SessionCheckpoint, TurnPhase,
};
use crate::memory::{ExecutionOutcome, ProposedCall, Transcript, TranscriptEntry};
use crate::react::events::send_event;
use crate::react::{AgentEvent, EventSender, Planner, PlannerResult};
use crate::tools::{ParallelToolExecutor, ToolRegistry};

/// start_turn / resume 的返回：挂起等待审批，或回合完成
#[derive(Debug, Clone)]
pub enum TurnStatus {
    Suspended {
        session_id: String,
        batch_id: String,
        requests: Vec<ApprovalRequest>,
    },
    Finished {
        session_id: String,
        answer: String,
        transcript: Transcript,
    },
}

impl TurnStatus {
    pub fn is_suspended(&self) -> bool {
        matches!(self, TurnStatus::Suspended { .. })
    }

    pub fn requests(&self) -> &[ApprovalRequest] {
        match self {
            TurnStatus::Suspended { requests, .. } => requests,
            TurnStatus::Finished { .. } => &[],
        }
    }
}

/// 执行中断时补写的结果说明
pub const INTERRUPTED_DETAIL: &str = "Tool execution was interrupted before completion";

/// 生成新的会话 ID
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub struct TurnOrchestrator {
    planner: Arc<dyn Planner>,
    registry: Arc<ToolRegistry>,
    builder: ApprovalRequestBuilder,
    executor: ParallelToolExecutor,
    store: Arc<dyn CheckpointStore>,
    max_iterations: usize,
}

impl TurnOrchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: ParallelToolExecutor,
        store: Arc<dyn CheckpointStore>,
        max_iterations: usize,
    ) -> Self {
        let registry = executor.registry().clone();
        Self {
            planner,
            builder: ApprovalRequestBuilder::new(registry.clone()),
            registry,
            executor,
            store,
            max_iterations,
        }
    }

    /// 开始新回合：会话有待审批批次时拒绝
    pub async fn start_turn(
        &self,
        session_id: &str,
        user_input: &str,
        events: Option<&EventSender>,
    ) -> Result<TurnStatus, AgentError> {
        let mut cp = self
            .store
            .load(session_id)
            .await?
            .unwrap_or_else(|| SessionCheckpoint::new(session_id));
        self.recover_interrupted(&mut cp).await?;
        if cp.is_suspended() {
            return Err(AgentError::SessionSuspended(session_id.to_string()));
        }

        tracing::info!(session_id = %session_id, "turn started");
        cp.transcript.push_user(user_input);
        cp.iteration = 0;
        cp.phase = TurnPhase::Planning;
        self.advance(cp, events).await
    }

    /// 用一整套决策恢复挂起的回合；决策不匹配或批次已解决时同步失败，检查点保持不变
    pub async fn resume(
        &self,
        session_id: &str,
        decisions: &[ApprovalDecision],
        events: Option<&EventSender>,
    ) -> Result<TurnStatus, AgentError> {
        let mut cp = self
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        self.recover_interrupted(&mut cp).await?;
        let gate = cp.gate.as_mut().ok_or(AgentError::GateNotSuspended)?;
        let resolution = gate.resolve(decisions)?;
        let batch_id = gate.batch_id().to_string();
        let calls = gate.calls().to_vec();

        // 先落盘 Resolved 状态，同一批次不会被再次恢复
        cp.phase = TurnPhase::Executing;
        self.persist(&mut cp).await?;

        send_event(
            events,
            AgentEvent::Resumed {
                batch_id: batch_id.clone(),
                approved: resolution.approved.len(),
                rejected: resolution.rejected.len(),
            },
        );
        send_event(
            events,
            AgentEvent::ToolExecutionStarted {
                call_ids: resolution.approved.iter().map(|c| c.id.clone()).collect(),
            },
        );

        let executed = self.executor.execute(&resolution.approved).await;
        let outcomes = merge_in_call_order(&calls, executed, resolution.rejected);
        tracing::info!(
            session_id = %session_id,
            batch_id = %batch_id,
            outcomes = outcomes.len(),
            "batch outcomes merged"
        );

        send_event(
            events,
            AgentEvent::ToolExecutionFinished {
                outcomes: outcomes.clone(),
            },
        );
        cp.transcript.extend_outcomes(outcomes);
        cp.phase = TurnPhase::Planning;
        self.advance(cp, events).await
    }

    /// 挂起会话的待审批请求；未挂起时为 None
    pub async fn pending(
        &self,
        session_id: &str,
    ) -> Result<Option<Vec<ApprovalRequest>>, AgentError> {
        Ok(self
            .store
            .load(session_id)
            .await?
            .and_then(|cp| cp.pending_requests().map(|r| r.to_vec())))
    }

    pub async fn transcript(&self, session_id: &str) -> Result<Option<Transcript>, AgentError> {
        Ok(self.store.load(session_id).await?.map(|cp| cp.transcript))
    }

    /// 放弃会话（含未决的审批）
    pub async fn discard(&self, session_id: &str) -> Result<(), AgentError> {
        tracing::info!(session_id = %session_id, "session discarded");
        self.store.discard(session_id).await
    }

    /// 执行中途进程退出的批次：为没有结果的调用补 ExecutedError，回合记为失败
    async fn recover_interrupted(&self, cp: &mut SessionCheckpoint) -> Result<(), AgentError> {
        if cp.phase != TurnPhase::Executing {
            return Ok(());
        }
        let Some(gate) = cp.gate.as_ref() else {
            return Ok(());
        };
        let missing: Vec<ExecutionOutcome> =
            calls_without_outcome(&cp.transcript, gate.batch_id(), gate.calls())
                .into_iter()
                .map(|call| ExecutionOutcome::error(call, INTERRUPTED_DETAIL))
                .collect();
        tracing::warn!(
            session_id = %cp.session_id,
            batch_id = %gate.batch_id(),
            missing = missing.len(),
            "tool execution was interrupted, marking unfinished calls as failed"
        );
        cp.transcript.extend_outcomes(missing);
        cp.phase = TurnPhase::Failed;
        self.persist(cp).await
    }

    /// 推进一步：检查轮数上限、规划；最终回答则结束回合，工具调用则在审批门挂起
    async fn advance(
        &self,
        mut cp: SessionCheckpoint,
        events: Option<&EventSender>,
    ) -> Result<TurnStatus, AgentError> {
        if cp.iteration >= self.max_iterations {
            tracing::warn!(
                session_id = %cp.session_id,
                limit = self.max_iterations,
                "max iterations exceeded"
            );
            let err = AgentError::MaxIterationsExceeded {
                limit: self.max_iterations,
                transcript: Box::new(cp.transcript.clone()),
            };
            return self.fail(cp, err, events).await;
        }

        cp.iteration += 1;
        cp.phase = TurnPhase::Planning;
        send_event(
            events,
            AgentEvent::PlanningStarted {
                iteration: cp.iteration,
                max_iterations: self.max_iterations,
            },
        );

        let tools = self.registry.describe_all();
        let planned = match self.planner.plan(&cp.transcript, &tools).await {
            Ok(p) => p,
            Err(e) => return self.fail(cp, e, events).await,
        };

        match planned {
            PlannerResult::Final(answer) => {
                cp.transcript.push(TranscriptEntry::Final {
                    answer: answer.clone(),
                });
                cp.phase = TurnPhase::Finished;
                self.persist(&mut cp).await?;
                tracing::info!(
                    session_id = %cp.session_id,
                    iterations = cp.iteration,
                    "turn finished"
                );
                send_event(
                    events,
                    AgentEvent::TurnFinished {
                        answer: answer.clone(),
                    },
                );
                Ok(TurnStatus::Finished {
                    session_id: cp.session_id,
                    answer,
                    transcript: cp.transcript,
                })
            }
            PlannerResult::ToolCalls(calls) if calls.is_empty() => {
                let err = AgentError::Planner("empty tool call batch".to_string());
                self.fail(cp, err, events).await
            }
            PlannerResult::ToolCalls(calls) => {
                let requests = match self.builder.build(&calls) {
                    Ok(r) => r,
                    Err(e) => return self.fail(cp, e, events).await,
                };
                let batch_id = batch_id_for(&cp);
                cp.transcript.push(TranscriptEntry::ToolCalls {
                    batch_id: batch_id.clone(),
                    calls: calls.clone(),
                });

                let mut gate = ApprovalGate::new(batch_id.clone(), calls, requests);
                let requests = gate.suspend()?.to_vec();
                cp.gate = Some(gate);
                cp.phase = TurnPhase::AwaitingDecisions;
                self.persist(&mut cp).await?;

                send_event(
                    events,
                    AgentEvent::ApprovalRequested {
                        batch_id: batch_id.clone(),
                        requests: requests.clone(),
                    },
                );
                Ok(TurnStatus::Suspended {
                    session_id: cp.session_id,
                    batch_id,
                    requests,
                })
            }
        }
    }

    /// 回合失败：保留截至此时的记录并落盘，再把错误交给调用方
    async fn fail(
        &self,
        mut cp: SessionCheckpoint,
        err: AgentError,
        events: Option<&EventSender>,
    ) -> Result<TurnStatus, AgentError> {
        cp.phase = TurnPhase::Failed;
        if let Err(save_err) = self.persist(&mut cp).await {
            tracing::error!(
                session_id = %cp.session_id,
                "failed to persist failed turn: {}",
                save_err
            );
        }
        tracing::warn!(session_id = %cp.session_id, "turn failed: {}", err);
        send_event(
            events,
            AgentEvent::TurnFailed {
                error: err.to_string(),
            },
        );
        Err(err)
    }

    async fn persist(&self, cp: &mut SessionCheckpoint) -> Result<(), AgentError> {
        cp.touch();
        self.store.save(cp).await
    }
}

/// 批次中 transcript 里还没有结果的调用
fn calls_without_outcome<'a>(
    transcript: &Transcript,
    batch_id: &str,
    calls: &'a [ProposedCall],
) -> Vec<&'a ProposedCall> {
    let entries = transcript.entries();
    let start = entries.iter().rposition(
        |e| matches!(e, TranscriptEntry::ToolCalls { batch_id: b, .. } if b == batch_id),
    );
    let done: HashSet<&str> = match start {
        Some(i) => entries[i + 1..]
            .iter()
            .filter_map(|e| match e {
                TranscriptEntry::ToolOutcome(o) => Some(o.call_id.as_str()),
                _ => None,
            })
            .collect(),
        None => HashSet::new(),
    };
    calls.iter().filter(|c| !done.contains(c.id.as_str())).collect()
}

/// 批次 ID 由回合序号与规划次数决定，同一输入与决策下可复现
fn batch_id_for(cp: &SessionCheckpoint) -> String {
    let turn = cp
        .transcript
        .entries()
        .iter()
        .filter(|e| matches!(e, TranscriptEntry::User { .. }))
        .count();
    format!("batch-{}-{}", turn, cp.iteration)
}

/// 按原调用顺序合并执行结果与拒绝结果；每个调用恰好一个结果
fn merge_in_call_order(
    calls: &[ProposedCall],
    executed: Vec<ExecutionOutcome>,
    rejected: Vec<ExecutionOutcome>,
) -> Vec<ExecutionOutcome> {
    let mut by_id: HashMap<String, ExecutionOutcome> = executed
        .into_iter()
        .chain(rejected)
        .map(|o| (o.call_id.clone(), o))
        .collect();
    calls
        .iter()
        .map(|call| {
            by_id
                .remove(&call.id)
                .unwrap_or_else(|| ExecutionOutcome::error(call, "No outcome produced for call"))
        })
        .collect()
}
