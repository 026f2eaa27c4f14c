//! 工具执行器
//!
//! 持有 ToolRegistry、单次调用超时、重试策略与并发上限。execute_round 为本轮每个调用各起一个任务（JoinSet），
//! 并发受本轮新建的许可池约束，等待全部完成（或整轮超时后取消剩余并记为 Timeout）。任何失败都就地转为 ToolResult，不会向上抛错；
//! 每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::core::{
    ErrorKind, RetryDecision, RetryPolicy, RoundPool, TaskScheduler, ToolCallRequest, ToolResult,
    ToolStatus,
};
use crate::llm::LlmError;
use crate::tools::{Tool, ToolFamily, ToolRegistry};

/// 工具执行器：可廉价 clone，内部共享只读注册表
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    retry: RetryPolicy,
    scheduler: TaskScheduler,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
            retry: RetryPolicy::no_retry(),
            scheduler: TaskScheduler::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_scheduler(mut self, scheduler: TaskScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn family_of(&self, name: &str) -> ToolFamily {
        self.registry.family_of(name)
    }

    /// 执行单个调用：超时 / 失败按策略重试，最终结果一定是一条 ToolResult
    pub async fn execute_one(&self, round: u32, call: &ToolCallRequest) -> ToolResult {
        self.execute_in(round, call, None).await
    }

    async fn execute_in(
        &self,
        round: u32,
        call: &ToolCallRequest,
        pool: Option<&RoundPool>,
    ) -> ToolResult {
        let start = Instant::now();
        let result = match self.registry.get(&call.tool) {
            Some(tool) => self.run_with_retry(round, call, tool, pool, start).await,
            None => ToolResult::failure(
                round,
                call,
                format!("Unknown tool: {}", call.tool),
                "unknown_tool",
                start.elapsed(),
            ),
        };
        audit(call, &result);
        result
    }

    async fn run_with_retry(
        &self,
        round: u32,
        call: &ToolCallRequest,
        tool: Arc<dyn Tool>,
        pool: Option<&RoundPool>,
        start: Instant,
    ) -> ToolResult {
        let mut attempt: u32 = 0;
        loop {
            let outcome = {
                let _permit = match pool {
                    Some(pool) => pool.acquire_tool().await,
                    None => None,
                };
                timeout(self.timeout, tool.execute(call.args.clone())).await
            };
            let (kind, failed) = match outcome {
                Ok(out) if out.success => {
                    let data = out.data.unwrap_or(serde_json::Value::Null);
                    return ToolResult::success(round, call, data, start.elapsed())
                        .with_attempts(attempt + 1);
                }
                Ok(out) => {
                    let message = out.error.unwrap_or_else(|| "tool reported failure".into());
                    let kind = transient_kind(&message);
                    let failed = ToolResult::failure(
                        round,
                        call,
                        message,
                        kind.map(ErrorKind::as_str).unwrap_or("tool_error"),
                        start.elapsed(),
                    );
                    (kind, failed)
                }
                Err(_) => (
                    Some(ErrorKind::Timeout),
                    ToolResult::timeout(round, call, start.elapsed()),
                ),
            };
            let decision = match kind {
                Some(k) => self.retry.decide(k, None, attempt),
                None => RetryDecision::Stop,
            };
            match decision {
                RetryDecision::Stop => return failed.with_attempts(attempt + 1),
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        tool = %call.tool,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "tool call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// 并发执行本轮全部调用，按完成顺序返回，条数恒等于 calls.len()。
    ///
    /// round_timeout 到期时取消未完成的调用，并为它们补记 Timeout。
    pub async fn execute_round(
        &self,
        round: u32,
        calls: &[ToolCallRequest],
        round_timeout: Option<Duration>,
    ) -> Vec<ToolResult> {
        let started = Instant::now();
        let pool = self.scheduler.round_pool();
        let mut join_set: JoinSet<(usize, ToolResult)> = JoinSet::new();
        for (index, call) in calls.iter().enumerate() {
            let exec = self.clone();
            let call = call.clone();
            let pool = pool.clone();
            join_set.spawn(async move {
                let begin = Instant::now();
                let result = AssertUnwindSafe(exec.execute_in(round, &call, Some(&pool)))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        ToolResult::failure(round, &call, "tool panicked", "panic", begin.elapsed())
                    });
                (index, result)
            });
        }

        let deadline = round_timeout.map(|d| tokio::time::Instant::now() + d);
        let mut done = vec![false; calls.len()];
        let mut results = Vec::with_capacity(calls.len());
        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, join_set.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!(
                            round,
                            outstanding = join_set.len(),
                            "round deadline exceeded, cancelling outstanding tool calls"
                        );
                        break;
                    }
                },
                None => join_set.join_next().await,
            };
            match next {
                Some(Ok((index, result))) => {
                    done[index] = true;
                    results.push(result);
                }
                // 任务内部已捕获 panic，这里只可能是被取消
                Some(Err(e)) => tracing::error!(round, error = %e, "tool task join failed"),
                None => break,
            }
        }
        join_set.abort_all();

        for (index, call) in calls.iter().enumerate() {
            if !done[index] {
                let result = ToolResult::timeout(round, call, started.elapsed());
                audit(call, &result);
                results.push(result);
            }
        }
        results
    }
}

/// 工具错误文本中可识别的瞬时故障（可重试）；其余视为工具自身的业务错误
fn transient_kind(message: &str) -> Option<ErrorKind> {
    let lower = message.to_ascii_lowercase();
    match LlmError::classify_message(message).kind() {
        ErrorKind::InvalidRequest | ErrorKind::SchemaViolation => None,
        ErrorKind::Unavailable
            if !["connection", "unavailable", "network"]
                .iter()
                .any(|n| lower.contains(n)) =>
        {
            None
        }
        kind => Some(kind),
    }
}

fn audit(call: &ToolCallRequest, result: &ToolResult) {
    let outcome = match result.status {
        ToolStatus::Success => "ok",
        ToolStatus::Error => "error",
        ToolStatus::Timeout => "timeout",
    };
    let audit = serde_json::json!({
        "event": "tool_audit",
        "round": result.round,
        "tool": call.tool,
        "ok": result.is_success(),
        "outcome": outcome,
        "attempts": result.attempts,
        "duration_ms": result.latency_ms,
        "args_preview": args_preview(&call.args),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
