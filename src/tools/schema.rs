//! Plan 输出 JSON Schema 生成（schemars）
//!
//! 将「合法的规划输出」结构注入 system prompt，减少 LLM 输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

/// 工具调用请求格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 knowledge_search、echo
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: HashMap<String, serde_json::Value>,
}

/// 返回单个工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
