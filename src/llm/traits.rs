//! LLM 客户端抽象（模型网关契约）
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（自由文本）与 complete_structured（按 schema 返回 JSON）。
//! 两者都是单次调用、内部不重试；重试由调用方通过 RetryPolicy 决定（见 RetryingLlmClient）。

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::core::ErrorKind;
use crate::memory::Message;

/// 模型网关失败分类
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Request timed out")]
    Timeout,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("Server fault ({status}): {message}")]
    ServerFault { status: u16, message: String },

    #[error("Schema violation: {0}")]
    SchemaViolation(String),
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::RateLimited { .. } => ErrorKind::RateLimited,
            LlmError::Timeout => ErrorKind::Timeout,
            LlmError::Unavailable(_) => ErrorKind::Unavailable,
            LlmError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            LlmError::ServerFault { .. } => ErrorKind::ServerFault,
            LlmError::SchemaViolation(_) => ErrorKind::SchemaViolation,
        }
    }

    /// 对应的 HTTP 状态码（若有）
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::RateLimited { .. } => Some(429),
            LlmError::InvalidRequest { status, .. } | LlmError::ServerFault { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            LlmError::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(std::time::Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// 由 HTTP 状态码构造
    pub fn from_status(status: u16, message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        let message = message.into();
        match status {
            429 => LlmError::RateLimited { retry_after_ms },
            408 | 504 if message.is_empty() => LlmError::Timeout,
            500..=599 => LlmError::ServerFault { status, message },
            _ => LlmError::InvalidRequest { status, message },
        }
    }

    /// 从后端 SDK 的错误文本推断分类（SDK 不暴露结构化状态码时使用）
    pub fn classify_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        let status = status_code_re()
            .captures(&message)
            .and_then(|c| c[1].parse::<u16>().ok());
        if let Some(status) = status {
            return Self::from_status(status, message, None);
        }
        let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
        if contains_any(&["rate limit", "too many requests"]) {
            LlmError::RateLimited {
                retry_after_ms: None,
            }
        } else if contains_any(&["timeout", "timed out"]) {
            LlmError::Timeout
        } else if contains_any(&["unauthorized", "forbidden", "invalid api key", "bad request", "invalid_request"]) {
            LlmError::InvalidRequest {
                status: 400,
                message,
            }
        } else if contains_any(&["server error", "internal error"]) {
            LlmError::ServerFault {
                status: 500,
                message,
            }
        } else {
            LlmError::Unavailable(message)
        }
    }
}

/// 独立成词的 4xx / 5xx 状态码，避免误判 "zip 50321" 这类数字
fn status_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([45]\d{2})\b").unwrap())
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 自由文本完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 结构化完成：返回值须符合 schema，无法转换时返回 SchemaViolation。
    /// 默认实现把 schema 注入 system 消息，再从文本回复中提取 JSON。
    async fn complete_structured(
        &self,
        messages: &[Message],
        schema: &Value,
    ) -> Result<Value, LlmError> {
        let mut full = Vec::with_capacity(messages.len() + 1);
        full.push(Message::system(format!(
            "Respond with a single JSON value matching this JSON Schema and nothing else:\n{}",
            schema
        )));
        full.extend_from_slice(messages);
        let text = self.complete(&full).await?;
        let json = extract_json(&text)
            .ok_or_else(|| LlmError::SchemaViolation(format!("no JSON in response: {}", preview(&text))))?;
        serde_json::from_str(json).map_err(|e| LlmError::SchemaViolation(format!("{e}: {}", preview(json))))
    }

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 以 T 的 JSON Schema 发起结构化调用并反序列化为 T
pub async fn complete_typed<T>(client: &dyn LlmClient, messages: &[Message]) -> Result<T, LlmError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = serde_json::to_value(schemars::schema_for!(T))
        .map_err(|e| LlmError::SchemaViolation(e.to_string()))?;
    let value = client.complete_structured(messages, &schema).await?;
    serde_json::from_value(value).map_err(|e| LlmError::SchemaViolation(e.to_string()))
}

/// 从文本中提取 JSON 块（```json ... ``` 或首个 { 到末个 }）
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end >= start).then(|| &trimmed[start..=end])
}

fn preview(s: &str) -> String {
    s.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            LlmError::from_status(429, "", Some(1200)),
            LlmError::RateLimited {
                retry_after_ms: Some(1200)
            }
        ));
        assert_eq!(LlmError::from_status(503, "busy", None).kind(), ErrorKind::ServerFault);
        assert_eq!(LlmError::from_status(404, "nope", None).kind(), ErrorKind::InvalidRequest);
        assert_eq!(LlmError::from_status(504, "", None), LlmError::Timeout);
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(
            LlmError::classify_message("HTTP 429 Too Many Requests").kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            LlmError::classify_message("error 401 unauthorized").kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            LlmError::classify_message("operation timed out").kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            LlmError::classify_message("connection refused").kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(
            LlmError::classify_message("status 503: upstream busy").kind(),
            ErrorKind::ServerFault
        );
    }

    #[test]
    fn test_classify_ignores_codes_inside_longer_numbers() {
        assert_eq!(
            LlmError::classify_message("no forecast for zip 50321").kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(
            LlmError::classify_message("invoice 14290 missing").kind(),
            ErrorKind::Unavailable
        );
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_json("sure: {\"a\":1} done"), Some("{\"a\":1}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_status_and_retry_after() {
        let e = LlmError::RateLimited {
            retry_after_ms: Some(50),
        };
        assert_eq!(e.status(), Some(429));
        assert_eq!(e.retry_after(), Some(std::time::Duration::from_millis(50)));
        assert_eq!(LlmError::Timeout.status(), None);
    }
}
