//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按脚本顺序返回预置回复；脚本耗尽后 complete 回显最后一条 User 消息，complete_structured 返回空对象。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// 一条预置回复
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Json(Value),
    Fail(LlmError),
}

/// Mock 客户端：脚本化回复 + 记录每次调用收到的消息
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(replies: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: MockReply) {
        if let Ok(mut s) = self.script.lock() {
            s.push_back(reply);
        }
    }

    /// 已收到的调用次数
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 剩余未消费的脚本条数
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next(&self, messages: &[Message]) -> Option<MockReply> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages.to_vec());
        }
        self.script.lock().ok().and_then(|mut s| s.pop_front())
    }
}

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        match self.next(messages) {
            Some(MockReply::Text(t)) => Ok(t),
            Some(MockReply::Json(v)) => Ok(v.to_string()),
            Some(MockReply::Fail(e)) => Err(e),
            None => Ok(format!("Echo from Mock: {}", last_user(messages))),
        }
    }

    async fn complete_structured(
        &self,
        messages: &[Message],
        _schema: &Value,
    ) -> Result<Value, LlmError> {
        match self.next(messages) {
            Some(MockReply::Json(v)) => Ok(v),
            Some(MockReply::Text(t)) => serde_json::from_str(&t)
                .map_err(|e| LlmError::SchemaViolation(format!("{e}: {t}"))),
            Some(MockReply::Fail(e)) => Err(e),
            None => Ok(Value::Object(Default::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_script_then_echo() {
        let mock = MockLlmClient::scripted(vec![MockReply::Text("first".into())]);
        let msgs = [Message::user("hello")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "first");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "Echo from Mock: hello");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_structured_text_must_be_json() {
        let mock = MockLlmClient::scripted(vec![
            MockReply::Text("not json".into()),
            MockReply::Text("{\"ok\": true}".into()),
        ]);
        let schema = json!({});
        let msgs = [Message::user("q")];
        assert!(matches!(
            mock.complete_structured(&msgs, &schema).await,
            Err(LlmError::SchemaViolation(_))
        ));
        assert_eq!(
            mock.complete_structured(&msgs, &schema).await.unwrap(),
            json!({"ok": true})
        );
        assert_eq!(mock.complete_structured(&msgs, &schema).await.unwrap(), json!({}));
    }
}
