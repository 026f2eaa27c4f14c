//! 重试 / 退避策略
//!
//! 纯函数：根据错误分类与已失败的尝试序号，决定停止还是等待多久后重试。
//! 模型网关调用方（RetryingLlmClient）与工具执行器共用同一策略，不含任何编排引擎知识。

use std::time::Duration;

use crate::core::ErrorKind;
use crate::llm::LlmError;

/// 默认可重试的 HTTP 状态码
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// 策略决策结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Stop,
    RetryAfter(Duration),
}

/// 指数退避策略：initial * multiplier^attempt，封顶 max_delay；服务端 retry-after 提示优先
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次），至少为 1
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8_000),
            multiplier: 2.0,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// 只尝试一次、从不重试
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max.max(initial);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        self
    }

    /// 核心决策。attempt_index 为刚刚失败的那次尝试的序号（从 0 开始）。
    pub fn decide(
        &self,
        kind: ErrorKind,
        retry_after: Option<Duration>,
        attempt_index: u32,
    ) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::Stop;
        }
        if attempt_index.saturating_add(1) >= self.max_attempts.max(1) {
            return RetryDecision::Stop;
        }
        match retry_after {
            Some(hint) if kind == ErrorKind::RateLimited => RetryDecision::RetryAfter(hint),
            _ => RetryDecision::RetryAfter(self.backoff_delay(attempt_index)),
        }
    }

    /// 针对具体网关错误的决策：带状态码的错误还需命中 retryable_status_codes
    pub fn decide_for(&self, err: &LlmError, attempt_index: u32) -> RetryDecision {
        if let Some(status) = err.status() {
            if !self.retryable_status_codes.contains(&status) {
                return RetryDecision::Stop;
            }
        }
        self.decide(err.kind(), err.retry_after(), attempt_index)
    }

    /// 不考虑提示时第 attempt_index 次失败后的等待时长
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let cap_ms = self.max_delay.max(self.initial_delay).as_millis() as f64;
        let exp = attempt_index.min(63) as i32;
        let raw = initial_ms * self.multiplier.max(1.0).powi(exp);
        let ms = if raw.is_finite() { raw.min(cap_ms) } else { cap_ms };
        Duration::from_millis(ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(5)
            .with_delays(Duration::from_millis(100), Duration::from_millis(1_000))
    }

    #[test]
    fn test_exponential_growth_capped() {
        let p = policy();
        assert_eq!(p.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(p.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(p.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(p.backoff_delay(3), Duration::from_millis(800));
        assert_eq!(p.backoff_delay(4), Duration::from_millis(1_000));
        assert_eq!(p.backoff_delay(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_non_retryable_stops_immediately() {
        let p = policy();
        assert_eq!(p.decide(ErrorKind::InvalidRequest, None, 0), RetryDecision::Stop);
        assert_eq!(p.decide(ErrorKind::SchemaViolation, None, 0), RetryDecision::Stop);
    }

    #[test]
    fn test_stops_at_max_attempts() {
        let p = policy();
        assert!(matches!(
            p.decide(ErrorKind::ServerFault, None, 3),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(p.decide(ErrorKind::ServerFault, None, 4), RetryDecision::Stop);
    }

    #[test]
    fn test_retry_after_hint_overrides_backoff() {
        let p = policy();
        let hint = Duration::from_secs(7);
        assert_eq!(
            p.decide(ErrorKind::RateLimited, Some(hint), 0),
            RetryDecision::RetryAfter(hint)
        );
    }

    #[test]
    fn test_status_outside_retryable_set_stops() {
        let p = policy();
        let err = LlmError::ServerFault {
            status: 501,
            message: "not implemented".into(),
        };
        assert_eq!(p.decide_for(&err, 0), RetryDecision::Stop);
        let err = LlmError::ServerFault {
            status: 503,
            message: "busy".into(),
        };
        assert!(matches!(p.decide_for(&err, 0), RetryDecision::RetryAfter(_)));
    }

    #[test]
    fn test_no_retry_policy() {
        let p = RetryPolicy::no_retry();
        assert_eq!(p.decide(ErrorKind::Timeout, None, 0), RetryDecision::Stop);
    }

    proptest! {
        #[test]
        fn prop_delays_non_decreasing_and_bounded(
            initial in 1u64..2_000,
            extra in 0u64..20_000,
            multiplier in 1.0f64..4.0,
            attempts in 1u32..30,
        ) {
            let max = initial + extra;
            let p = RetryPolicy::default()
                .with_max_attempts(attempts + 1)
                .with_delays(Duration::from_millis(initial), Duration::from_millis(max))
                .with_multiplier(multiplier);
            let mut last = Duration::ZERO;
            for i in 0..attempts {
                match p.decide(ErrorKind::ServerFault, None, i) {
                    RetryDecision::RetryAfter(d) => {
                        prop_assert!(d >= last);
                        prop_assert!(d <= Duration::from_millis(max));
                        last = d;
                    }
                    RetryDecision::Stop => prop_assert!(false, "stopped early at {}", i),
                }
            }
        }
    }
}
