//! 并行工具执行器
//!
//! 对已批准的调用集合逐个 spawn，Semaphore 限制并发，每个调用加超时，最后统一 join；
//! 工具返回 Err、超时、panic、被取消或工具不存在，都转为 ExecutedError 结果，绝不影响同批其它调用。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::memory::{ExecutionOutcome, ProposedCall};
use crate::tools::ToolRegistry;

/// 并行工具执行器：执行是一个屏障，所有调用都有终态后才返回
pub struct ParallelToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    permits: Arc<Semaphore>,
    cancel_token: Option<CancellationToken>,
}

impl ParallelToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            registry,
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancel_token: None,
        }
    }

    /// 由调用方提供取消令牌；取消后尚未完成的调用记为 ExecutedError
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 执行全部已批准调用，每个输入恰好返回一个结果（按输入顺序）
    pub async fn execute(&self, calls: &[ProposedCall]) -> Vec<ExecutionOutcome> {
        if calls.is_empty() {
            return Vec::new();
        }

        let handles: Vec<_> = calls
            .iter()
            .cloned()
            .map(|call| {
                let registry = self.registry.clone();
                let permits = self.permits.clone();
                let limit = self.timeout;
                let cancel = self.cancel_token.clone().unwrap_or_default();
                tokio::spawn(async move { run_one(registry, permits, limit, cancel, call).await })
            })
            .collect();

        let joined = join_all(handles).await;

        calls
            .iter()
            .zip(joined)
            .map(|(call, res)| match res {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        call_id = %call.id,
                        tool = %call.tool,
                        "tool task aborted: {}",
                        e
                    );
                    ExecutionOutcome::error(call, format!("Tool task aborted: {}", e))
                }
            })
            .collect()
    }
}

async fn run_one(
    registry: Arc<ToolRegistry>,
    permits: Arc<Semaphore>,
    limit: Duration,
    cancel: CancellationToken,
    call: ProposedCall,
) -> ExecutionOutcome {
    let tool = match registry.resolve(&call.tool) {
        Ok(t) => t,
        Err(e) => return ExecutionOutcome::error(&call, e.to_string()),
    };
    let _permit = match permits.acquire_owned().await {
        Ok(p) => p,
        Err(_) => return ExecutionOutcome::error(&call, "Executor closed"),
    };

    let start = Instant::now();
    let args_preview = args_preview(&call);
    let args = serde_json::Value::Object(call.args.clone());

    let result = tokio::select! {
        r = timeout(limit, tool.execute(args)) => Some(r),
        _ = cancel.cancelled() => None,
    };

    let (ok, outcome): (bool, &str) = match &result {
        Some(Ok(Ok(_))) => (true, "ok"),
        Some(Ok(Err(_))) => (false, "error"),
        Some(Err(_)) => (false, "timeout"),
        None => (false, "cancelled"),
    };
    let audit = serde_json::json!({
        "event": "tool_audit",
        "call_id": call.id,
        "tool": call.tool,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");

    match result {
        Some(Ok(Ok(content))) => ExecutionOutcome::ok(&call, content),
        Some(Ok(Err(e))) => ExecutionOutcome::error(&call, e),
        Some(Err(_)) => ExecutionOutcome::error(
            &call,
            format!("Tool timeout after {}s: {}", limit.as_secs(), call.tool),
        ),
        None => ExecutionOutcome::error(&call, "Cancelled"),
    }
}

fn args_preview(call: &ProposedCall) -> String {
    let s = serde_json::Value::Object(call.args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::OutcomeStatus;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OkTool;

    #[async_trait]
    impl Tool for OkTool {
        fn name(&self) -> &str {
            "ok"
        }
        fn description(&self) -> &str {
            "always ok"
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(format!("ok:{}", args.get("n").cloned().unwrap_or(Value::Null)))
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("provider down".to_string())
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panic"
        }
        fn description(&self) -> &str {
            "panics"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            panic!("tool exploded");
        }
    }

    struct SlowTool {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok("slept".to_string())
        }
    }

    fn registry_with(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        for t in tools {
            registry.register_arc(t).unwrap();
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_empty_input() {
        let executor = ParallelToolExecutor::new(registry_with(vec![]), Duration::from_secs(5), 2);
        assert!(executor.execute(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_siblings() {
        let registry =
            registry_with(vec![Arc::new(OkTool), Arc::new(FailTool), Arc::new(PanicTool)]);
        let executor = ParallelToolExecutor::new(registry, Duration::from_secs(5), 4);
        let calls = vec![
            ProposedCall::new("a", "ok", json!({"n": 1})),
            ProposedCall::new("b", "fail", json!({})),
            ProposedCall::new("c", "panic", json!({})),
            ProposedCall::new("d", "missing", json!({})),
            ProposedCall::new("e", "ok", json!({"n": 2})),
        ];
        let outcomes = executor.execute(&calls).await;

        assert_eq!(outcomes.len(), 5);
        let ids: Vec<_> = outcomes.iter().map(|o| o.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(outcomes[0].status, OutcomeStatus::ExecutedOk);
        assert_eq!(outcomes[0].detail, "ok:1");
        assert_eq!(outcomes[1].status, OutcomeStatus::ExecutedError);
        assert_eq!(outcomes[1].detail, "provider down");
        assert_eq!(outcomes[2].status, OutcomeStatus::ExecutedError);
        assert_eq!(outcomes[3].status, OutcomeStatus::ExecutedError);
        assert!(outcomes[3].detail.contains("missing"));
        assert_eq!(outcomes[4].status, OutcomeStatus::ExecutedOk);
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_outcome() {
        let tool = SlowTool {
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_secs(5),
        };
        let executor = ParallelToolExecutor::new(
            registry_with(vec![Arc::new(tool)]),
            Duration::from_millis(20),
            2,
        );
        let outcomes = executor
            .execute(&[ProposedCall::new("a", "slow", json!({}))])
            .await;
        assert_eq!(outcomes[0].status, OutcomeStatus::ExecutedError);
        assert!(outcomes[0].detail.contains("timeout"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tool = SlowTool {
            running: running.clone(),
            peak: peak.clone(),
            delay: Duration::from_millis(30),
        };
        let executor = ParallelToolExecutor::new(
            registry_with(vec![Arc::new(tool)]),
            Duration::from_secs(5),
            2,
        );
        let calls: Vec<_> = (0..6)
            .map(|i| ProposedCall::new(format!("c{i}"), "slow", json!({})))
            .collect();
        let outcomes = executor.execute(&calls).await;
        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::ExecutedOk));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_calls_become_errors() {
        let tool = SlowTool {
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_secs(5),
        };
        let token = CancellationToken::new();
        token.cancel();
        let executor = ParallelToolExecutor::new(
            registry_with(vec![Arc::new(tool)]),
            Duration::from_secs(30),
            2,
        )
        .with_cancel_token(token);
        let outcomes = executor
            .execute(&[ProposedCall::new("a", "slow", json!({}))])
            .await;
        assert_eq!(outcomes[0].status, OutcomeStatus::ExecutedError);
        assert_eq!(outcomes[0].detail, "Cancelled");
    }
}
