//! Run Driver：对外的单次运行入口
//!
//! 每个请求新建一份 TaskState（历史 + 偏好 + 本次用户消息），交给 Engine 独占执行，
//! 结束后取出 final_answer 并返回更新后的会话；TaskState 本身随即丢弃。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::core::{AgentError, ErrorRecord, TaskState, ToolResult};
use crate::engine::{best_effort_answer, Engine, EngineEvent, RunMetrics};
use crate::memory::{extract_remember_content, Message, SessionMemory};

/// 审计用的工具调用记录（原始请求 + 状态 / 结果 / 耗时）
pub type ToolCallRecord = ToolResult;

/// 一次运行的结果：最终答案 + 诊断元数据 + 更新后的会话
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub run_id: String,
    pub started_at: String,
    pub final_answer: String,
    pub tools_called: Vec<ToolCallRecord>,
    pub tool_errors: Vec<ErrorRecord>,
    pub metrics: RunMetrics,
    pub session: SessionMemory,
}

/// 可 clone，内部共享同一个 Engine；并发运行之间不共享任何可变状态
#[derive(Clone)]
pub struct Agent {
    engine: Arc<Engine>,
}

impl Agent {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn run(
        &self,
        user_message: &str,
        prior: Option<SessionMemory>,
    ) -> Result<RunOutput, AgentError> {
        self.run_with(user_message, prior, &CancellationToken::new(), None)
            .await
    }

    /// 带取消令牌与事件通道的运行
    pub async fn run_with(
        &self,
        user_message: &str,
        prior: Option<SessionMemory>,
        cancel: &CancellationToken,
        events: Option<&UnboundedSender<EngineEvent>>,
    ) -> Result<RunOutput, AgentError> {
        let message = user_message.trim();
        if message.is_empty() {
            return Err(AgentError::Validation("user message is empty".to_string()));
        }
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("run", run_id = %run_id);
        self.execute(run_id, message, prior.unwrap_or_default(), cancel, events)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        run_id: String,
        message: &str,
        mut session: SessionMemory,
        cancel: &CancellationToken,
        events: Option<&UnboundedSender<EngineEvent>>,
    ) -> Result<RunOutput, AgentError> {
        let started_at = chrono::Utc::now().to_rfc3339();
        if let Some(pref) = extract_remember_content(message) {
            tracing::info!(preference = %pref, "preference remembered");
            session.add_preference(pref);
        }

        let mut state = TaskState::new(message, self.engine.config().limits);
        state.preferences = session.preferences.clone();
        state.conversation = std::mem::take(&mut session.history);
        state.push_message(Message::user(message));
        tracing::info!(history = state.conversation.len() - 1, "run started");

        let metrics = self.engine.run(&mut state, cancel, events).await?;
        let final_answer = match state.take_final_answer() {
            Some(answer) => answer,
            None => {
                tracing::error!("engine returned without a final answer");
                best_effort_answer(&state)
            }
        };

        session.history = state.conversation;
        Ok(RunOutput {
            run_id,
            started_at,
            final_answer,
            tools_called: state.tools_called,
            tool_errors: state.tool_errors,
            metrics,
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::llm::{MockLlmClient, MockReply};
    use crate::memory::Role;
    use crate::tools::{ToolExecutor, ToolRegistry};
    use serde_json::json;
    use std::time::Duration;

    fn agent(mock: Arc<MockLlmClient>) -> Agent {
        let exec = ToolExecutor::new(ToolRegistry::new(), Duration::from_secs(1));
        Agent::new(Engine::new(mock, exec, EngineConfig::default()))
    }

    #[tokio::test]
    async fn test_empty_message_is_validation_error() {
        let err = agent(Arc::new(MockLlmClient::new()))
            .run("   ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[tokio::test]
    async fn test_session_updated_with_turn_and_preference() {
        let mock = Arc::new(MockLlmClient::scripted(vec![MockReply::Json(
            json!({"answer": "Noted."}),
        )]));
        let prior = SessionMemory::new().with_history(vec![Message::user("earlier")]);
        let out = agent(mock.clone())
            .run("remember: answer briefly", Some(prior))
            .await
            .unwrap();

        assert_eq!(out.final_answer, "Noted.");
        assert_eq!(out.session.preferences, vec!["answer briefly".to_string()]);
        let roles: Vec<Role> = out.session.history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::User, Role::Assistant]);
        // 偏好在同一次运行里就进入 prompt
        assert!(mock.requests()[0][0].content.contains("- answer briefly"));
        assert!(!out.run_id.is_empty());
    }
}
