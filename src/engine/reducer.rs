//! Reduce：把一轮并发产生的结果合并进 TaskState
//!
//! 只做追加：tool_results / tools_called / tool_errors / conversation 都按完成顺序拼接，从不覆盖。
//! 合并前保证本轮结果与 pending_tool_calls 一一对应（按工具名 + 参数关联），缺失的调用补记 Timeout。

use std::time::Duration;

use crate::core::{ErrorRecord, TaskState, ToolResult, ToolStatus};
use crate::engine::metrics::RoundMetrics;
use crate::memory::Message;

pub fn reduce_round(state: &mut TaskState, results: Vec<ToolResult>, elapsed: Duration) -> RoundMetrics {
    let calls = std::mem::take(&mut state.pending_tool_calls);
    let round = state.round;

    let mut claimed = vec![false; calls.len()];
    let mut merged = Vec::with_capacity(calls.len());
    for result in results {
        let slot = calls
            .iter()
            .enumerate()
            .position(|(i, c)| !claimed[i] && result.matches(c));
        match slot {
            Some(i) => {
                claimed[i] = true;
                merged.push(result);
            }
            None => tracing::warn!(
                round,
                tool = %result.tool,
                "dropping tool result with no matching pending call"
            ),
        }
    }
    for (i, call) in calls.iter().enumerate() {
        if !claimed[i] {
            tracing::warn!(round, tool = %call.tool, "no result for pending call, recording timeout");
            merged.push(ToolResult::timeout(round, call, elapsed));
        }
    }

    let mut metrics = RoundMetrics {
        round,
        dispatched: calls.len(),
        elapsed_ms: elapsed.as_millis() as u64,
        ..RoundMetrics::default()
    };
    for result in &merged {
        match result.status {
            ToolStatus::Success => metrics.succeeded += 1,
            ToolStatus::Error => metrics.failed += 1,
            ToolStatus::Timeout => metrics.timed_out += 1,
        }
        state
            .conversation
            .push(Message::tool_result(round, result.tool.clone(), result.render()));
        if let Some(err) = ErrorRecord::from_result(result) {
            state.tool_errors.push(err);
        }
    }
    state.tools_called.extend(merged.iter().cloned());
    state.tool_results.extend(merged);
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Limits, ToolCallRequest};
    use crate::memory::Role;
    use serde_json::json;

    fn state_with(calls: Vec<ToolCallRequest>) -> TaskState {
        let mut s = TaskState::new("q", Limits::default());
        s.round = 1;
        s.pending_tool_calls = calls;
        s
    }

    #[test]
    fn test_reduce_appends_in_completion_order() {
        let a = ToolCallRequest::new("weather", json!({"city": "Oslo"}));
        let b = ToolCallRequest::new("fx_rate", json!({"pair": "EURUSD"}));
        let mut s = state_with(vec![a.clone(), b.clone()]);
        let results = vec![
            ToolResult::success(1, &b, json!(1.08), Duration::from_millis(3)),
            ToolResult::failure(1, &a, "503 upstream", "server_fault", Duration::from_millis(9)),
        ];
        let m = reduce_round(&mut s, results, Duration::from_millis(9));

        assert_eq!(s.tool_results.len(), 2);
        assert_eq!(s.tool_results[0].tool, "fx_rate");
        assert_eq!(s.tool_errors.len(), 1);
        assert_eq!(s.tool_errors[0].tool, "weather");
        assert!(s.pending_tool_calls.is_empty());
        assert_eq!((m.dispatched, m.succeeded, m.failed), (2, 1, 1));
        assert_eq!(
            s.conversation.iter().filter(|m| m.role == Role::ToolResult).count(),
            2
        );
    }

    #[test]
    fn test_missing_result_recorded_as_timeout() {
        let a = ToolCallRequest::new("slow", json!({}));
        let b = ToolCallRequest::new("echo", json!({"text": "x"}));
        let mut s = state_with(vec![a, b.clone()]);
        let results = vec![ToolResult::success(1, &b, json!("x"), Duration::ZERO)];
        let m = reduce_round(&mut s, results, Duration::from_millis(100));

        assert_eq!(s.tool_results.len(), 2);
        assert_eq!(m.timed_out, 1);
        assert_eq!(s.tool_errors[0].error_type, "timeout");
    }

    #[test]
    fn test_duplicate_calls_each_get_one_slot() {
        let a = ToolCallRequest::new("echo", json!({"text": "same"}));
        let mut s = state_with(vec![a.clone(), a.clone()]);
        let results = vec![
            ToolResult::success(1, &a, json!("same"), Duration::ZERO),
            ToolResult::success(1, &a, json!("same"), Duration::ZERO),
            ToolResult::success(1, &a, json!("same"), Duration::ZERO),
        ];
        reduce_round(&mut s, results, Duration::ZERO);
        assert_eq!(s.tool_results.len(), 2);
    }

    #[test]
    fn test_errors_accumulate_across_rounds() {
        let a = ToolCallRequest::new("weather", json!({}));
        let mut s = state_with(vec![a.clone()]);
        reduce_round(
            &mut s,
            vec![ToolResult::timeout(1, &a, Duration::from_millis(5))],
            Duration::from_millis(5),
        );
        s.round = 2;
        s.tool_results.clear();
        s.pending_tool_calls = vec![a.clone()];
        reduce_round(
            &mut s,
            vec![ToolResult::timeout(2, &a, Duration::from_millis(5))],
            Duration::from_millis(5),
        );
        assert_eq!(s.tool_errors.len(), 2);
        assert_eq!(s.tools_called.len(), 2);
        assert_eq!(s.tool_results.len(), 1);
        assert_eq!(s.tool_errors[1].round, 2);
    }
}
