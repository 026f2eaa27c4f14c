//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；SDK 错误按文本归类为 LlmError。
//! 结构化调用使用 `response_format = json_schema`，由服务端约束输出。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError};

/// response_format 中的 schema 名
const STRUCTURED_OUTPUT_NAME: &str = "structured_output";
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名与单次请求超时
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout: Duration::from_secs(60),
            usage: TokenUsage::new(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let invalid = |e: async_openai::error::OpenAIError| LlmError::InvalidRequest {
            status: 400,
            message: e.to_string(),
        };
        messages
            .iter()
            .map(|m| match m.role {
                Role::System => Ok(ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(invalid)?,
                )),
                Role::User => Ok(ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(invalid)?,
                )),
                // 工具结果以 user 消息回灌，并标注来源工具
                Role::ToolResult => {
                    let tool = m.tool_call.as_ref().map(|c| c.tool.as_str()).unwrap_or("tool");
                    Ok(ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(format!("Observation from {}: {}", tool, m.content))
                            .build()
                            .map_err(invalid)?,
                    ))
                }
                Role::Assistant => Ok(ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(invalid)?,
                )),
            })
            .collect()
    }

    async fn chat(
        &self,
        messages: &[Message],
        response_format: Option<ResponseFormat>,
    ) -> Result<String, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(self.to_openai_messages(messages)?);
        if let Some(format) = response_format {
            args.response_format(format);
        }
        let request = args.build().map_err(|e| LlmError::InvalidRequest {
            status: 400,
            message: e.to_string(),
        })?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::classify_message(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}

/// 以调用方给出的 schema 构造 json_schema 输出格式。
/// strict 只在 schema 顶层关闭了额外字段时开启，否则服务端会拒绝该 schema。
fn json_schema_format(schema: &Value) -> ResponseFormat {
    let strict = schema.get("additionalProperties") == Some(&Value::Bool(false));
    ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: schema
                .get("description")
                .and_then(Value::as_str)
                .map(String::from),
            name: STRUCTURED_OUTPUT_NAME.to_string(),
            schema: Some(schema.clone()),
            strict: Some(strict),
        },
    }
}

/// 结构化回复必须整体是 JSON
fn parse_structured(text: &str) -> Result<Value, LlmError> {
    serde_json::from_str(text.trim()).map_err(|e| {
        LlmError::SchemaViolation(format!(
            "{e}: {}",
            text.chars().take(200).collect::<String>()
        ))
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.chat(messages, None).await
    }

    async fn complete_structured(
        &self,
        messages: &[Message],
        schema: &Value,
    ) -> Result<Value, LlmError> {
        let text = self.chat(messages, Some(json_schema_format(schema))).await?;
        parse_structured(&text)
    }
}
