//! 会话记忆：运行前由外部加载的历史与用户偏好，运行后返回更新版本
//!
//! 引擎本身不做任何存储 I/O，持久化交给调用方。

use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// 一个会话的可持久化部分：历史消息 + 用户偏好
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMemory {
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub preferences: Vec<String>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// 追加偏好（去重）
    pub fn add_preference(&mut self, pref: impl Into<String>) {
        let pref = pref.into();
        if !pref.is_empty() && !self.preferences.contains(&pref) {
            self.preferences.push(pref);
        }
    }
}

/// 拼入 system prompt 的偏好段落；无偏好时为空串
pub fn preferences_section(preferences: &[String]) -> String {
    if preferences.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = preferences.iter().map(|p| format!("- {p}")).collect();
    format!("User preferences:\n{}", lines.join("\n"))
}

/// 只识别以命令开头的「记住：xxx」/「remember: xxx」，句中出现的 remember 不算
pub fn extract_remember_content(input: &str) -> Option<String> {
    let input = input.trim();
    let after = ["请记住", "记住"]
        .iter()
        .find_map(|cmd| input.strip_prefix(cmd))
        .or_else(|| {
            let head = input.get(.."remember".len())?;
            head.eq_ignore_ascii_case("remember")
                .then(|| &input["remember".len()..])
        })?
        .trim_start();
    let content = after
        .strip_prefix('：')
        .or_else(|| after.strip_prefix(':'))?
        .trim();
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_remember_chinese() {
        assert_eq!(
            extract_remember_content("请记住：回答用中文"),
            Some("回答用中文".to_string())
        );
    }

    #[test]
    fn test_extract_remember_english() {
        assert_eq!(
            extract_remember_content("Remember: prefer metric units"),
            Some("prefer metric units".to_string())
        );
        assert_eq!(extract_remember_content("remember:   "), None);
        assert_eq!(extract_remember_content("what is the weather"), None);
        assert_eq!(
            extract_remember_content("  remember : metric units"),
            Some("metric units".to_string())
        );
    }

    #[test]
    fn test_remember_inside_sentence_is_not_a_command() {
        assert_eq!(
            extract_remember_content("Do you remember: what is the refund window?"),
            None
        );
        assert_eq!(extract_remember_content("I remembered: nothing"), None);
        assert_eq!(extract_remember_content("rememberable: x"), None);
        assert_eq!(extract_remember_content("你还记住：什么"), None);
    }

    #[test]
    fn test_preferences_dedup_and_section() {
        let mut s = SessionMemory::new();
        assert!(preferences_section(&s.preferences).is_empty());
        s.add_preference("short answers");
        s.add_preference("short answers");
        assert_eq!(s.preferences.len(), 1);
        assert!(preferences_section(&s.preferences).contains("- short answers"));
    }
}
