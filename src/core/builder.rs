//! Agent 构建器：把配置、模型网关与工具注册表装配成可运行的 Agent
//!
//! 所有入口（CLI、测试、嵌入方）共用同一套装配逻辑：网关外包一层重试，
//! 工具执行器带超时 / 并发上限 / 重试策略，Guardrail 与前置步骤按配置启用。

use std::sync::Arc;
use std::time::Duration;

use crate::agent::Agent;
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::engine::{CitationGuardrail, Engine, NonEmptyGuardrail, ToolManifestPrep};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, RetryingLlmClient};
use crate::tools::{ToolExecutor, ToolFamily, ToolRegistry};

/// 按配置选择模型网关：provider=openai 且设置了 OPENAI_API_KEY 时用 OpenAI 兼容端点，否则用 Mock。
/// 未知的 provider 是配置错误。
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    let provider = cfg.llm.provider.trim().to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    match (provider.as_str(), api_key) {
        ("openai", Some(key)) => {
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Ok(Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key))
                    .with_request_timeout(Duration::from_secs(cfg.llm.request_timeout_secs.max(1))),
            ))
        }
        ("openai", None) | ("mock", _) => {
            tracing::warn!(provider = %provider, "No API key set or provider is mock, using Mock LLM");
            Ok(Arc::new(MockLlmClient::new()))
        }
        (other, _) => Err(AgentError::Config(format!(
            "unknown llm provider '{other}' (expected openai or mock)"
        ))),
    }
}

pub struct AgentBuilder {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
}

impl AgentBuilder {
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>, registry: ToolRegistry) -> Self {
        Self {
            config,
            llm,
            registry,
        }
    }

    /// 网关调用按 [retry] 段重试，节点本身只看到最终结果
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        Arc::new(RetryingLlmClient::new(
            self.llm.clone(),
            self.config.retry_policy(),
        ))
    }

    pub fn build_executor(&self) -> ToolExecutor {
        ToolExecutor::new(self.registry.clone(), self.config.tool_timeout())
            .with_retry_policy(self.config.tool_retry_policy())
            .with_scheduler(self.config.task_scheduler())
    }

    /// 已注册的检索类工具名
    pub fn rag_tools(&self) -> Vec<String> {
        self.registry
            .tool_names()
            .into_iter()
            .filter(|name| self.registry.family_of(name) == ToolFamily::Rag)
            .collect()
    }

    pub fn build_engine(&self) -> Engine {
        let mut engine = Engine::new(
            self.build_llm(),
            self.build_executor(),
            self.config.engine_config(),
        )
        .with_guardrail(NonEmptyGuardrail);

        let rag_tools = self.rag_tools();
        if self.config.engine.require_citations && !rag_tools.is_empty() {
            engine = engine.with_guardrail(CitationGuardrail::new(rag_tools));
        }
        if self.config.engine.tool_manifest_prep {
            engine = engine.with_prep_step(ToolManifestPrep::new(&self.registry));
        }
        engine
    }

    pub fn build(self) -> Agent {
        Agent::new(self.build_engine())
    }
}
