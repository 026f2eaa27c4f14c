//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ENGINE__MAX_REPLANS=3`）。
//! 数值不合法时（0 次尝试、倍数 < 1、上限小于初始延迟）在转换为运行期类型时归一化，而不是拒绝加载。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{Limits, RetryPolicy, TaskScheduler, DEFAULT_RETRYABLE_STATUS_CODES};
use crate::engine::EngineConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub retry: RetrySection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
}

/// [engine] 段：三个循环上限、整轮超时、降级检索工具、是否要求引用
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_iterations: u32,
    pub max_replans: u32,
    pub max_guardrail_retries: u32,
    /// 整轮工具执行截止时间（毫秒），0 表示不设整轮截止
    pub round_timeout_ms: u64,
    pub rag_tool: String,
    pub require_citations: bool,
    /// 第一次 Plan 前注入完整工具清单
    pub tool_manifest_prep: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_replans: 2,
            max_guardrail_retries: 2,
            round_timeout_ms: 30_000,
            rag_tool: "knowledge_search".to_string(),
            require_citations: true,
            tool_manifest_prep: false,
        }
    }
}

/// [retry] 段：模型网关调用的退避策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            request_timeout_secs: 60,
        }
    }
}

/// [tools] 段：单次调用超时、同轮并发上限、工具重试次数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_ms: u64,
    pub max_concurrent_tools: usize,
    /// 1 表示不重试
    pub max_attempts: u32,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_ms: 10_000,
            max_concurrent_tools: 4,
            max_attempts: 1,
        }
    }
}

impl AppConfig {
    pub fn limits(&self) -> Limits {
        Limits {
            max_iterations: self.engine.max_iterations,
            max_replans: self.engine.max_replans,
            max_retries: self.engine.max_guardrail_retries,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let rag_tool = if self.engine.rag_tool.trim().is_empty() {
            EngineSection::default().rag_tool
        } else {
            self.engine.rag_tool.trim().to_string()
        };
        EngineConfig {
            limits: self.limits(),
            round_timeout: (self.engine.round_timeout_ms > 0)
                .then(|| Duration::from_millis(self.engine.round_timeout_ms)),
            rag_tool,
        }
    }

    /// 模型网关调用的重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        let r = &self.retry;
        RetryPolicy {
            retryable_status_codes: r.retryable_status_codes.clone(),
            ..RetryPolicy::default()
        }
        .with_max_attempts(r.max_attempts)
        .with_delays(
            Duration::from_millis(r.initial_backoff_ms),
            Duration::from_millis(r.max_backoff_ms),
        )
        .with_multiplier(r.backoff_multiplier)
    }

    /// 工具调用的重试策略：沿用退避参数，尝试次数由 [tools] 段决定
    pub fn tool_retry_policy(&self) -> RetryPolicy {
        self.retry_policy().with_max_attempts(self.tools.max_attempts)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tools.tool_timeout_ms.max(1))
    }

    pub fn task_scheduler(&self) -> TaskScheduler {
        TaskScheduler::new(self.tools.max_concurrent_tools)
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
