//! 各节点共用的 prompt 拼装与默认提示词
//!
//! 提示词优先从 config/prompts/<name>.md 读取（当前目录或上一级），找不到时用内置默认值。

use crate::core::TaskState;
use crate::memory::{preferences_section, Message};

pub const DEFAULT_PLANNER_PROMPT: &str = "You are the planning step of a tool-using assistant. \
Decide which tools to call next to answer the user's question. Calls you list run concurrently, \
so never list a call that depends on another call's result; request it in a later round instead. \
If the question can be answered without tools, leave tool_calls empty and put the answer in `answer`. \
Set `route` to ragOnly, toolsOnly or ragAndTools according to the tool families you selected.";

pub const DEFAULT_OBSERVER_PROMPT: &str = "You judge whether the information gathered so far is \
sufficient to answer the user's question. Reply with `sufficient`, `next_action` (generate or replan) \
and the list of missing facts in `gaps`.";

pub const DEFAULT_GENERATOR_PROMPT: &str = "You write the final answer to the user's question using \
only the tool results in the conversation. When you rely on a retrieved document, cite it with its \
citation marker exactly as given, for example [doc-1]. If some tools failed, say what could not be \
determined instead of guessing.";

/// 按名称加载提示词文件，失败时返回默认值
pub fn load_prompt(name: &str, default: &str) -> String {
    [
        format!("config/prompts/{name}.md"),
        format!("../config/prompts/{name}.md"),
    ]
    .into_iter()
    .find_map(|p| std::fs::read_to_string(p).ok())
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
    .unwrap_or_else(|| default.to_string())
}

/// system 提示词 + 偏好 + 前置上下文，后接完整对话
pub fn compose(system_prompt: &str, state: &TaskState) -> Vec<Message> {
    let mut system = system_prompt.to_string();
    let preferences = preferences_section(&state.preferences);
    if !preferences.is_empty() {
        system.push_str("\n\n");
        system.push_str(&preferences);
    }
    for ctx in &state.prep_context {
        system.push_str("\n\n");
        system.push_str(ctx);
    }
    let mut messages = Vec::with_capacity(state.conversation.len() + 1);
    messages.push(Message::system(system));
    messages.extend(state.conversation.iter().cloned());
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Limits;
    use crate::memory::Role;

    #[test]
    fn test_compose_injects_preferences_and_context() {
        let mut s = TaskState::new("q", Limits::default());
        s.preferences.push("answer in French".into());
        s.prep_context.push("Available tools: echo".into());
        s.push_message(Message::user("q"));
        let msgs = compose("base", &s);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[0].content.contains("- answer in French"));
        assert!(msgs[0].content.contains("Available tools: echo"));
    }

    #[test]
    fn test_missing_prompt_file_uses_default() {
        assert_eq!(load_prompt("does-not-exist", "fallback"), "fallback");
    }
}
