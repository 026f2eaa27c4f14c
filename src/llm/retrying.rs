//! 调用方重试包装
//!
//! 网关本身单次调用；RetryingLlmClient 按 RetryPolicy 在失败后退避重试，
//! 不可重试的错误（InvalidRequest / SchemaViolation）只调用一次。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{RetryDecision, RetryPolicy};
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// 带重试的 LLM 客户端：对 complete / complete_structured 施加同一策略
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
    attempts: AtomicU64,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            attempts: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 累计发往底层网关的调用次数（含重试）
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, LlmError>> + Send,
        T: Send,
    {
        let mut attempt: u32 = 0;
        loop {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            match call().await {
                Ok(v) => return Ok(v),
                Err(e) => match self.policy.decide_for(&e, attempt) {
                    RetryDecision::Stop => {
                        tracing::debug!(op, attempt, error = %e, "llm call failed, not retrying");
                        return Err(e);
                    }
                    RetryDecision::RetryAfter(delay) => {
                        tracing::warn!(
                            op,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "llm call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                },
            }
        }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.with_retry("complete", || self.inner.complete(messages))
            .await
    }

    async fn complete_structured(
        &self,
        messages: &[Message],
        schema: &Value,
    ) -> Result<Value, LlmError> {
        self.with_retry("complete_structured", || {
            self.inner.complete_structured(messages, schema)
        })
        .await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
