//! Plan / Tool-Selection 节点
//!
//! 一次结构化 LLM 调用给出本轮工具调用、声明的路由，或者直接回答。
//! 失败时由 Engine 决定降级（ragOnly 检索 / 直接生成），这里只负责调用与解析。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::{TaskState, ToolCallRequest};
use crate::engine::node::ToolSelectionRoute;
use crate::engine::prompt::{compose, load_prompt, DEFAULT_PLANNER_PROMPT};
use crate::llm::{complete_typed, LlmClient, LlmError};
use crate::memory::Message;
use crate::tools::ToolRegistry;

/// 规划输出中的单个工具调用
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlannedCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// 规划输出：三个字段都可缺省
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct PlanOutput {
    #[serde(default)]
    pub route: Option<ToolSelectionRoute>,
    #[serde(default)]
    pub tool_calls: Vec<PlannedCall>,
    #[serde(default)]
    pub answer: Option<String>,
}

impl PlanOutput {
    /// 去掉空工具名；null 参数视为 {}
    pub fn into_requests(self) -> Vec<ToolCallRequest> {
        self.tool_calls
            .into_iter()
            .filter(|c| !c.tool.trim().is_empty())
            .map(|c| {
                let args = if c.args.is_null() {
                    Value::Object(Default::default())
                } else {
                    c.args
                };
                ToolCallRequest::new(c.tool.trim(), args)
            })
            .collect()
    }
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn from_default_prompt(llm: Arc<dyn LlmClient>) -> Self {
        Self::new(llm, load_prompt("planner", DEFAULT_PLANNER_PROMPT))
    }

    pub async fn plan(&self, state: &TaskState, tools: &ToolRegistry) -> Result<PlanOutput, LlmError> {
        let mut system = self.system_prompt.clone();
        let listing: Vec<String> = tools
            .tool_descriptions()
            .into_iter()
            .map(|(name, desc)| {
                let family = match tools.family_of(&name) {
                    crate::tools::ToolFamily::Rag => "rag",
                    crate::tools::ToolFamily::Action => "action",
                };
                format!("- {name} ({family}): {desc}")
            })
            .collect();
        if listing.is_empty() {
            system.push_str("\n\nNo tools are available.");
        } else {
            system.push_str("\n\nAvailable tools:\n");
            system.push_str(&listing.join("\n"));
        }

        let mut messages = compose(&system, state);
        if let Some(obs) = state.observation.as_ref().filter(|o| o.wants_replan()) {
            let gaps = if obs.gaps.is_empty() {
                "unspecified".to_string()
            } else {
                obs.gaps.join("; ")
            };
            messages.push(Message::system(format!(
                "The information gathered so far is insufficient. Missing: {gaps}. Plan the next round."
            )));
        }
        complete_typed::<PlanOutput>(self.llm.as_ref(), &messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Limits;
    use crate::llm::{MockLlmClient, MockReply};
    use crate::tools::{EchoTool, KnowledgeSearchTool};
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(EchoTool);
        r.register(KnowledgeSearchTool::new(vec![]));
        r
    }

    #[tokio::test]
    async fn test_plan_parses_calls_and_route() {
        let mock = Arc::new(MockLlmClient::scripted(vec![MockReply::Json(json!({
            "route": "ragOnly",
            "tool_calls": [
                {"tool": "knowledge_search", "args": {"query": "refunds"}},
                {"tool": "echo", "args": null},
                {"tool": " "}
            ]
        }))]));
        let planner = Planner::new(mock.clone(), "plan");
        let out = planner
            .plan(&TaskState::new("q", Limits::default()), &registry())
            .await
            .unwrap();
        assert_eq!(out.route, Some(ToolSelectionRoute::RagOnly));
        let calls = out.into_requests();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].args, json!({}));

        let sent = &mock.requests()[0];
        assert!(sent[0].content.contains("- knowledge_search (rag)"));
    }

    #[tokio::test]
    async fn test_plan_schema_violation_propagates() {
        let mock = Arc::new(MockLlmClient::scripted(vec![MockReply::Json(json!({
            "tool_calls": "not a list"
        }))]));
        let planner = Planner::new(mock, "plan");
        let err = planner
            .plan(&TaskState::new("q", Limits::default()), &registry())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::SchemaViolation(_)));
    }
}
