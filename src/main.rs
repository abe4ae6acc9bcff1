//! Scout - 人工审批的调研智能体
//!
//! 入口：初始化日志、加载配置、装配编排器，然后在终端里跑 对话 -> 审批 -> 恢复 循环。
//!
//! 用法：scout [--config <path>] [--session <id>] [message...]
//! - 每个工具调用都要逐条确认：y 批准，n 拒绝，其他文本作为拒绝理由，q 离开（会话保留，可用 --session 恢复）
//! - /new 开始新会话，/quit 退出

use std::path::PathBuf;

use anyhow::Context;
use scout::config::load_config;
use scout::core::{
    new_session_id, AgentError, ApprovalDecision, ApprovalRequest, TurnOrchestrator, TurnStatus,
};
use scout::react::AgentEvent;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type StdinLines = Lines<BufReader<Stdin>>;

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    session: Option<String>,
    message: Option<String>,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => out.config = Some(args.next().context("--config needs a path")?.into()),
            "--session" => out.session = Some(args.next().context("--session needs an id")?),
            _ => words.push(arg),
        }
    }
    if !words.is_empty() {
        out.message = Some(words.join(" "));
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scout::observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });
    // Ctrl-C 取消正在执行的工具调用；再按一次退出
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if signal_token.is_cancelled() {
                std::process::exit(130);
            }
            eprintln!("\nCancelling running tools (press Ctrl-C again to exit)");
            signal_token.cancel();
        }
    });

    let orchestrator = scout::build_orchestrator(&cfg, cancel)
        .await
        .context("Failed to create agent")?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut session_id = args.session.clone().unwrap_or_else(new_session_id);
    println!("Session: {}", session_id);

    // 恢复挂起的会话
    if args.session.is_some() {
        if let Some(requests) = orchestrator.pending(&session_id).await? {
            println!("Resuming {} pending tool call(s).", requests.len());
            let status = TurnStatus::Suspended {
                session_id: session_id.clone(),
                batch_id: String::new(),
                requests,
            };
            if !drive_approvals(&orchestrator, status, &tx, &mut rx, &mut stdin).await? {
                return Ok(());
            }
        }
    }

    let mut next_input = args.message.clone();
    loop {
        let input = match next_input.take() {
            Some(m) => m,
            None => match prompt(&mut stdin, "> ").await? {
                Some(line) => line,
                None => break,
            },
        };
        let input = input.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                session_id = new_session_id();
                println!("Session: {}", session_id);
                continue;
            }
            _ => {}
        }

        let status = match orchestrator.start_turn(&session_id, input, Some(&tx)).await {
            Ok(s) => s,
            Err(e) => {
                print_events(&mut rx);
                eprintln!("Error: {}", e);
                continue;
            }
        };
        if !drive_approvals(&orchestrator, status, &tx, &mut rx, &mut stdin).await? {
            break;
        }
    }

    Ok(())
}

/// 逐批收集决策并恢复，直到回合结束；用户选择离开时返回 false
async fn drive_approvals(
    orchestrator: &TurnOrchestrator,
    mut status: TurnStatus,
    tx: &mpsc::UnboundedSender<AgentEvent>,
    rx: &mut mpsc::UnboundedReceiver<AgentEvent>,
    stdin: &mut StdinLines,
) -> anyhow::Result<bool> {
    loop {
        print_events(rx);
        let (session_id, batch_id, requests) = match status {
            TurnStatus::Finished { answer, .. } => {
                println!("\n{}\n", answer);
                return Ok(true);
            }
            TurnStatus::Suspended {
                session_id,
                batch_id,
                requests,
            } => (session_id, batch_id, requests),
        };

        let decisions = match ask_decisions(&requests, stdin).await? {
            Some(d) => d,
            None => {
                println!(
                    "Session left pending. Resume with: scout --session {}",
                    session_id
                );
                return Ok(false);
            }
        };

        match orchestrator.resume(&session_id, &decisions, Some(tx)).await {
            Ok(next) => status = next,
            Err(e) if decide_again(&e) => {
                print_events(rx);
                eprintln!("Error: {}. Please decide again.", e);
                status = TurnStatus::Suspended {
                    session_id,
                    batch_id,
                    requests,
                };
            }
            Err(e) => {
                print_events(rx);
                eprintln!("Error: {}", e);
                return Ok(true);
            }
        }
    }
}

/// 决策被拒绝但批次仍在等待时，对同一批次重新询问
fn decide_again(e: &AgentError) -> bool {
    e.is_protocol_error() && !matches!(e, AgentError::AlreadyResolved { .. })
}

async fn ask_decisions(
    requests: &[ApprovalRequest],
    stdin: &mut StdinLines,
) -> anyhow::Result<Option<Vec<ApprovalDecision>>> {
    let mut decisions = Vec::with_capacity(requests.len());
    for req in requests {
        println!("\n--- Approval needed [{}] ---\n{}", req.call_id, req.preview);
        let answer = match prompt(stdin, "Approve? [y]es / [n]o / reason / [q]uit: ").await? {
            Some(a) => a,
            None => return Ok(None),
        };
        let decision = match answer.trim() {
            "y" | "Y" | "yes" => ApprovalDecision::approve(&req.call_id),
            "q" | "Q" | "quit" => return Ok(None),
            "" | "n" | "N" | "no" => ApprovalDecision::reject(&req.call_id, None),
            reason => ApprovalDecision::reject(&req.call_id, Some(reason.to_string())),
        };
        decisions.push(decision);
    }
    Ok(Some(decisions))
}

async fn prompt(stdin: &mut StdinLines, text: &str) -> anyhow::Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(stdin.next_line().await?)
}

fn print_events(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) {
    while let Ok(ev) = rx.try_recv() {
        match ev {
            AgentEvent::PlanningStarted {
                iteration,
                max_iterations,
            } => println!("[planning {}/{}]", iteration, max_iterations),
            AgentEvent::ToolExecutionStarted { call_ids } if !call_ids.is_empty() => {
                println!("[running {}]", call_ids.join(", "))
            }
            AgentEvent::ToolExecutionFinished { outcomes } => {
                for o in outcomes {
                    let first_line = o.detail.lines().next().unwrap_or("");
                    println!("[{} {:?}] {}", o.tool, o.status, first_line);
                }
            }
            AgentEvent::TurnFailed { error } => println!("[failed] {}", error),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatched_decisions_ask_again() {
        let mismatch = AgentError::DecisionMismatch {
            expected: vec!["call_0".to_string()],
            received: vec!["call_9".to_string()],
        };
        assert!(decide_again(&mismatch));
        assert!(decide_again(&AgentError::Validation("bad args".to_string())));
        assert!(!decide_again(&AgentError::AlreadyResolved {
            batch_id: "batch-1-1".to_string()
        }));
        assert!(!decide_again(&AgentError::Planner("llm down".to_string())));
        assert!(!decide_again(&AgentError::SessionNotFound("s1".to_string())));
    }
}
