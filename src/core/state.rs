//! 任务状态：单次运行中在各节点间传递的唯一可变记录
//!
//! TaskState 由 Run Driver 每次请求新建一份，仅由 Engine 独占持有，运行结束提取 final_answer 后丢弃。
//! 计数器只增不减，上限由 Engine 强制（节点只能请求继续，不能越过上限）。

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Message;

/// 本轮请求执行的一次工具调用（工具名 + 参数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

impl ToolCallRequest {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// 单次工具调用结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
    Timeout,
}

/// 一次已完成的工具调用：保留原始请求以便审计，失败条目带 `_error` / `_error_type` 标记
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub round: u32,
    pub tool: String,
    pub args: Value,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "_error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "_error_type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub latency_ms: u64,
    /// 实际尝试次数（含重试）
    pub attempts: u32,
}

impl ToolResult {
    pub fn success(round: u32, call: &ToolCallRequest, data: Value, latency: Duration) -> Self {
        Self {
            round,
            tool: call.tool.clone(),
            args: call.args.clone(),
            status: ToolStatus::Success,
            data: Some(data),
            error: None,
            error_type: None,
            latency_ms: latency.as_millis() as u64,
            attempts: 1,
        }
    }

    pub fn failure(
        round: u32,
        call: &ToolCallRequest,
        error: impl Into<String>,
        error_type: impl Into<String>,
        latency: Duration,
    ) -> Self {
        Self {
            round,
            tool: call.tool.clone(),
            args: call.args.clone(),
            status: ToolStatus::Error,
            data: None,
            error: Some(error.into()),
            error_type: Some(error_type.into()),
            latency_ms: latency.as_millis() as u64,
            attempts: 1,
        }
    }

    pub fn timeout(round: u32, call: &ToolCallRequest, latency: Duration) -> Self {
        Self {
            status: ToolStatus::Timeout,
            ..Self::failure(
                round,
                call,
                format!("{} timed out after {}ms", call.tool, latency.as_millis()),
                "timeout",
                latency,
            )
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// 是否对应某个请求（按工具名 + 参数关联，结果顺序与请求顺序无关）
    pub fn matches(&self, call: &ToolCallRequest) -> bool {
        self.tool == call.tool && self.args == call.args
    }

    /// 供 prompt 使用的单行渲染
    pub fn render(&self) -> String {
        match self.status {
            ToolStatus::Success => {
                let data = self
                    .data
                    .as_ref()
                    .map(|d| match d {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                format!("[{}] ok: {}", self.tool, data)
            }
            _ => format!(
                "[{}] {}: {}",
                self.tool,
                self.error_type.as_deref().unwrap_or("error"),
                self.error.as_deref().unwrap_or("")
            ),
        }
    }
}

/// 失败条目的精简记录（toolErrors 日志，跨轮累积、永不截断）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub round: u32,
    pub tool: String,
    pub args: Value,
    pub error_type: String,
    pub error: String,
}

impl ErrorRecord {
    pub fn from_result(result: &ToolResult) -> Option<Self> {
        if result.is_success() {
            return None;
        }
        Some(Self {
            round: result.round,
            tool: result.tool.clone(),
            args: result.args.clone(),
            error_type: result.error_type.clone().unwrap_or_else(|| "error".into()),
            error: result.error.clone().unwrap_or_default(),
        })
    }
}

/// Observation 节点的下一步请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Generate,
    Replan,
}

/// 最近一次信息充分性判断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub sufficient: bool,
    pub next_action: NextAction,
    #[serde(default)]
    pub gaps: Vec<String>,
}

impl Observation {
    pub fn sufficient() -> Self {
        Self {
            sufficient: true,
            next_action: NextAction::Generate,
            gaps: Vec::new(),
        }
    }

    pub fn insufficient(gaps: Vec<String>) -> Self {
        Self {
            sufficient: false,
            next_action: NextAction::Replan,
            gaps,
        }
    }

    /// 节点是否请求重新规划（sufficient=true 时忽略 replan 请求）
    pub fn wants_replan(&self) -> bool {
        !self.sufficient && self.next_action == NextAction::Replan
    }
}

/// 三个循环的上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_iterations: u32,
    pub max_replans: u32,
    pub max_retries: u32,
}

impl Limits {
    /// 到达 Finalize 前节点访问次数的上界：
    /// 可选前置步骤 1 次；Plan 至多 max_replans+1 次，每次后接 ToolExecution + Observation；
    /// Generate 与 Guardrail 各至多 max_retries+1 次；Finalize 1 次。
    pub fn max_node_visits(&self) -> u32 {
        let plans = self.max_replans.saturating_add(1);
        let generations = self.max_retries.saturating_add(1);
        1u32.saturating_add(plans.saturating_mul(3))
            .saturating_add(generations.saturating_mul(2))
            .saturating_add(1)
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_replans: 2,
            max_retries: 2,
        }
    }
}

/// 单次运行的全部可变状态
#[derive(Debug, Clone)]
pub struct TaskState {
    /// 本次用户输入
    pub query: String,
    /// 只追加
    pub conversation: Vec<Message>,
    pub preferences: Vec<String>,
    pub limits: Limits,
    pub iteration_count: u32,
    pub replan_count: u32,
    pub retry_count: u32,
    /// 当前轮次（从 1 开始，0 表示尚未执行工具）
    pub round: u32,
    pub pending_tool_calls: Vec<ToolCallRequest>,
    /// 当前轮的结果，按完成顺序追加
    pub tool_results: Vec<ToolResult>,
    /// 所有轮次的调用记录（审计用，保持轮次顺序）
    pub tools_called: Vec<ToolResult>,
    pub tool_errors: Vec<ErrorRecord>,
    pub observation: Option<Observation>,
    pub validation_errors: Vec<String>,
    /// Generate / 直接回复产生的草稿，Guardrail 校验对象
    pub draft: Option<String>,
    /// 仅由 Finalize 节点设置一次
    final_answer: Option<String>,
    /// RetrievalPrep 等前置步骤注入的上下文
    pub prep_context: Vec<String>,
    /// 前置步骤产生的工具结果（不计入 tools_called，但可被引用）
    pub prep_results: Vec<ToolResult>,
    /// Plan 节点是否因失败退化到了 fallback 选择
    pub selection_failed: bool,
}

impl TaskState {
    pub fn new(query: impl Into<String>, limits: Limits) -> Self {
        Self {
            query: query.into(),
            conversation: Vec::new(),
            preferences: Vec::new(),
            limits,
            iteration_count: 0,
            replan_count: 0,
            retry_count: 0,
            round: 0,
            pending_tool_calls: Vec::new(),
            tool_results: Vec::new(),
            tools_called: Vec::new(),
            tool_errors: Vec::new(),
            observation: None,
            validation_errors: Vec::new(),
            draft: None,
            final_answer: None,
            prep_context: Vec::new(),
            prep_results: Vec::new(),
            selection_failed: false,
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.conversation.push(message);
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.final_answer.is_some()
    }

    /// 设置最终答案；已设置时返回 false 且不覆盖
    pub fn set_final_answer(&mut self, answer: String) -> bool {
        if self.final_answer.is_some() {
            return false;
        }
        self.final_answer = Some(answer);
        true
    }

    pub fn take_final_answer(&mut self) -> Option<String> {
        self.final_answer.take()
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.iteration_count >= self.limits.max_iterations
    }

    pub fn replans_exhausted(&self) -> bool {
        self.replan_count >= self.limits.max_replans
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.limits.max_retries
    }

    /// 所有轮次中成功的结果（供 Generate / Guardrail / 降级回答使用）
    pub fn successful_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.tools_called.iter().filter(|r| r.is_success())
    }

    /// 可作为引用来源的成功结果：前置步骤结果在前，随后是各轮次结果
    pub fn citable_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.prep_results
            .iter()
            .chain(self.tools_called.iter())
            .filter(|r| r.is_success())
    }

    /// 拼进 prompt 的上下文段落：前置上下文 + 所有轮次工具结果
    pub fn context_section(&self) -> String {
        let mut parts: Vec<String> = self.prep_context.clone();
        if !self.tools_called.is_empty() {
            let lines: Vec<String> = self.tools_called.iter().map(|r| r.render()).collect();
            parts.push(format!("Tool results:\n{}", lines.join("\n")));
        }
        parts.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_final_answer_set_once() {
        let mut state = TaskState::new("q", Limits::default());
        assert!(!state.is_finished());
        assert!(state.set_final_answer("first".into()));
        assert!(!state.set_final_answer("second".into()));
        assert_eq!(state.final_answer(), Some("first"));
    }

    #[test]
    fn test_failed_result_has_error_markers() {
        let call = ToolCallRequest::new("weather", json!({"city": "Paris"}));
        let r = ToolResult::failure(1, &call, "upstream 503", "server_fault", Duration::from_millis(5));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["_error"], "upstream 503");
        assert_eq!(v["_error_type"], "server_fault");
        assert!(r.matches(&call));
        assert!(ErrorRecord::from_result(&r).is_some());
    }

    #[test]
    fn test_success_has_no_error_markers() {
        let call = ToolCallRequest::new("echo", json!({"text": "hi"}));
        let r = ToolResult::success(1, &call, json!("hi"), Duration::from_millis(1));
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("_error").is_none());
        assert!(ErrorRecord::from_result(&r).is_none());
        assert_eq!(r.render(), "[echo] ok: hi");
    }

    #[test]
    fn test_timeout_status() {
        let call = ToolCallRequest::new("slow", json!({}));
        let r = ToolResult::timeout(2, &call, Duration::from_millis(50));
        assert_eq!(r.status, ToolStatus::Timeout);
        assert_eq!(r.error_type.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_observation_wants_replan() {
        assert!(Observation::insufficient(vec!["price".into()]).wants_replan());
        assert!(!Observation::sufficient().wants_replan());
        let contradictory = Observation {
            sufficient: true,
            next_action: NextAction::Replan,
            gaps: vec![],
        };
        assert!(!contradictory.wants_replan());
    }

    #[test]
    fn test_tool_call_request_defaults_args() {
        let c: ToolCallRequest = serde_json::from_str(r#"{"tool": "echo"}"#).unwrap();
        assert_eq!(c.args, json!({}));
    }
}
