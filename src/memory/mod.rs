//! 记忆层：对话消息与会话记忆（历史 + 偏好）

pub mod conversation;
pub mod session;

pub use conversation::{Message, Role, ToolCallRef};
pub use session::{extract_remember_content, preferences_section, SessionMemory};
