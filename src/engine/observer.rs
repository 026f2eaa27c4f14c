//! Observation 节点：判断已收集信息是否足够回答

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::{NextAction, Observation, TaskState};
use crate::engine::prompt::{load_prompt, DEFAULT_OBSERVER_PROMPT};
use crate::llm::{complete_typed, LlmClient, LlmError};
use crate::memory::Message;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ObservationOutput {
    #[serde(default = "default_sufficient")]
    pub sufficient: bool,
    #[serde(default)]
    pub next_action: Option<NextAction>,
    #[serde(default)]
    pub gaps: Vec<String>,
}

fn default_sufficient() -> bool {
    true
}

impl From<ObservationOutput> for Observation {
    /// next_action 缺省时由 sufficient 推出
    fn from(out: ObservationOutput) -> Self {
        let next_action = out.next_action.unwrap_or(if out.sufficient {
            NextAction::Generate
        } else {
            NextAction::Replan
        });
        Observation {
            sufficient: out.sufficient,
            next_action,
            gaps: out.gaps,
        }
    }
}

pub struct Observer {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Observer {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn from_default_prompt(llm: Arc<dyn LlmClient>) -> Self {
        Self::new(llm, load_prompt("observer", DEFAULT_OBSERVER_PROMPT))
    }

    pub async fn observe(&self, state: &TaskState) -> Result<Observation, LlmError> {
        let gathered = state.context_section();
        let messages = [
            Message::system(self.system_prompt.clone()),
            Message::user(format!(
                "Question: {}\n\n{}",
                state.query,
                if gathered.is_empty() {
                    "Nothing has been gathered yet."
                } else {
                    gathered.as_str()
                }
            )),
        ];
        let out: ObservationOutput = complete_typed(self.llm.as_ref(), &messages).await?;
        Ok(out.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Limits;
    use crate::llm::{MockLlmClient, MockReply};
    use serde_json::json;

    #[tokio::test]
    async fn test_insufficient_defaults_to_replan() {
        let mock = Arc::new(MockLlmClient::scripted(vec![MockReply::Json(
            json!({"sufficient": false, "gaps": ["exchange rate"]}),
        )]));
        let obs = Observer::new(mock, "judge")
            .observe(&TaskState::new("q", Limits::default()))
            .await
            .unwrap();
        assert!(obs.wants_replan());
        assert_eq!(obs.gaps, vec!["exchange rate".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_reply_is_sufficient() {
        let obs = Observer::new(Arc::new(MockLlmClient::new()), "judge")
            .observe(&TaskState::new("q", Limits::default()))
            .await
            .unwrap();
        assert_eq!(obs, Observation::sufficient());
    }
}
