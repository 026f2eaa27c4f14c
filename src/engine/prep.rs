//! 可选前置步骤（RetrievalPrep 节点）：在第一次 Plan 之前向上下文注入信息
//!
//! 前置步骤失败不影响运行，只记一条 warn。

use async_trait::async_trait;
use serde_json::json;

use crate::core::{AgentError, TaskState, ToolCallRequest, ToolResult};
use crate::tools::{tool_call_schema_json, ToolExecutor, ToolRegistry};

/// 前置步骤的产出：注入 system 上下文的文本，以及可被引用的工具结果
#[derive(Debug, Clone, Default)]
pub struct PrepOutput {
    pub context: String,
    pub sources: Vec<ToolResult>,
}

impl PrepOutput {
    pub fn text(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            sources: Vec::new(),
        }
    }
}

#[async_trait]
pub trait PrepStep: Send + Sync {
    fn name(&self) -> &str;

    /// 返回要注入的上下文；None 表示无内容
    async fn prepare(&self, state: &TaskState) -> Result<Option<PrepOutput>, AgentError>;
}

/// 注入已注册工具的完整 JSON 清单（含参数 schema）
pub struct ToolManifestPrep {
    manifest: String,
}

impl ToolManifestPrep {
    pub fn new(registry: &ToolRegistry) -> Self {
        Self {
            manifest: registry.to_schema_json(),
        }
    }
}

#[async_trait]
impl PrepStep for ToolManifestPrep {
    fn name(&self) -> &str {
        "tool_manifest"
    }

    async fn prepare(&self, _state: &TaskState) -> Result<Option<PrepOutput>, AgentError> {
        if self.manifest.is_empty() || self.manifest == "[]" {
            return Ok(None);
        }
        Ok(Some(PrepOutput::text(format!(
            "## Tool manifest (arguments must match these JSON Schemas)\n```json\n{}\n```\n\n\
             ## Tool call format\n```json\n{}\n```",
            self.manifest,
            tool_call_schema_json()
        ))))
    }
}

/// 用原始问题预先跑一次检索工具，命中内容作为背景上下文
pub struct KnowledgePrefetch {
    executor: ToolExecutor,
    tool: String,
}

impl KnowledgePrefetch {
    pub fn new(executor: ToolExecutor, tool: impl Into<String>) -> Self {
        Self {
            executor,
            tool: tool.into(),
        }
    }
}

#[async_trait]
impl PrepStep for KnowledgePrefetch {
    fn name(&self) -> &str {
        "knowledge_prefetch"
    }

    async fn prepare(&self, state: &TaskState) -> Result<Option<PrepOutput>, AgentError> {
        let call = ToolCallRequest::new(self.tool.clone(), json!({ "query": state.query }));
        let result = self.executor.execute_one(0, &call).await;
        if !result.is_success() {
            return Err(AgentError::ToolExecution(
                result.error.unwrap_or_else(|| format!("{} failed", self.tool)),
            ));
        }
        Ok(Some(PrepOutput {
            context: format!("Background from {}:\n{}", self.tool, result.render()),
            sources: vec![result],
        }))
    }
}
