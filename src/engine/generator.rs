//! Generate 节点：根据对话与工具结果生成答案草稿；失败时降级为 best_effort_answer

use std::sync::Arc;

use crate::core::TaskState;
use crate::engine::prompt::{compose, load_prompt, DEFAULT_GENERATOR_PROMPT};
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

pub struct Generator {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Generator {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn from_default_prompt(llm: Arc<dyn LlmClient>) -> Self {
        Self::new(llm, load_prompt("generator", DEFAULT_GENERATOR_PROMPT))
    }

    /// feedback 为上一版草稿被 Guardrail 拒绝的原因
    pub async fn generate(&self, state: &TaskState, feedback: &[String]) -> Result<String, LlmError> {
        let mut messages = compose(&self.system_prompt, state);
        if !feedback.is_empty() {
            messages.push(Message::system(format!(
                "Your previous draft was rejected:\n- {}\nWrite a corrected answer.",
                feedback.join("\n- ")
            )));
        }
        let text = self.llm.complete(&messages).await?;
        Ok(text.trim().to_string())
    }
}

/// 不调用模型的兜底回答：用已收集的成功结果拼一个尽力而为的答复
pub fn best_effort_answer(state: &TaskState) -> String {
    let found: Vec<String> = state.successful_results().map(|r| r.render()).collect();
    if !found.is_empty() {
        return format!(
            "I could not compose a complete answer to \"{}\". Here is what I found:\n{}",
            state.query,
            found.join("\n")
        );
    }
    if !state.tool_errors.is_empty() {
        return format!(
            "I was unable to gather the information needed to answer \"{}\" ({} tool call(s) failed).",
            state.query,
            state.tool_errors.len()
        );
    }
    format!("I'm sorry, I could not produce an answer to \"{}\".", state.query)
}
