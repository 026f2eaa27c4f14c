//! LLM 层：模型网关抽象、调用方重试包装与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod retrying;
pub mod traits;

pub use mock::{MockLlmClient, MockReply};
pub use openai::{OpenAiClient, TokenUsage};
pub use retrying::RetryingLlmClient;
pub use traits::{complete_typed, extract_json, LlmClient, LlmError};
