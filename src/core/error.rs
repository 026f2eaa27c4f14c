//! Agent 错误类型与错误分类
//!
//! 与 RetryPolicy 配合：根据 ErrorKind 决定立即停止还是退避重试。
//! 工具级失败在 ToolExecutor 内部就地恢复为 ToolResult，不会以 AgentError 形式越过执行边界。

use thiserror::Error;

use crate::llm::LlmError;

/// 运行过程中可能出现的错误（工具、外部服务、输入校验、结构化输出）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// 模型网关或工具上游依赖不可达 / 限流 / 超时，且重试已耗尽
    #[error("External service error: {0}")]
    ExternalService(#[from] LlmError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 错误分类（RetryPolicy 的输入），与具体错误载荷解耦
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 429；可能带服务端给出的 retry-after
    RateLimited,
    Timeout,
    /// 连接失败
    Unavailable,
    /// 4xx（429 除外），不可重试
    InvalidRequest,
    /// 5xx，可重试
    ServerFault,
    /// 结构化输出无法转换为声明的 schema，不可重试
    SchemaViolation,
}

impl ErrorKind {
    /// 与尝试次数无关的可重试性
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::Timeout
                | ErrorKind::Unavailable
                | ErrorKind::ServerFault
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ServerFault => "server_fault",
            ErrorKind::SchemaViolation => "schema_violation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
