//! 决策函数：State -> 路由，全部为纯函数
//!
//! 上限在这里统一判定：节点可以请求继续（replan / retry / 再调工具），上限到达时一律导向前进（generate / finalize）。

use crate::core::TaskState;
use crate::engine::node::{GuardrailRoute, ObservationRoute, PlanRoute, ToolSelectionRoute};
use crate::tools::ToolFamily;

/// 由本轮实际选中的能力族推导路由；选择步骤整体失败或没有选中任何工具时退回 RagOnly
pub fn tool_selection_route(
    state: &TaskState,
    family_of: impl Fn(&str) -> ToolFamily,
) -> ToolSelectionRoute {
    if state.selection_failed {
        return ToolSelectionRoute::RagOnly;
    }
    let has_rag = state
        .pending_tool_calls
        .iter()
        .any(|c| family_of(&c.tool) == ToolFamily::Rag);
    let has_action = state
        .pending_tool_calls
        .iter()
        .any(|c| family_of(&c.tool) == ToolFamily::Action);
    match (has_rag, has_action) {
        (true, true) => ToolSelectionRoute::RagAndTools,
        (false, true) => ToolSelectionRoute::ToolsOnly,
        _ => ToolSelectionRoute::RagOnly,
    }
}

/// 声明的路由与实际选择不一致时，以实际选择为准；返回 (路由, 是否被纠正)
pub fn reconcile_route(
    declared: Option<ToolSelectionRoute>,
    computed: ToolSelectionRoute,
) -> (ToolSelectionRoute, bool) {
    match declared {
        Some(d) if d != computed => (computed, true),
        _ => (computed, false),
    }
}

pub fn plan_route(state: &TaskState) -> PlanRoute {
    if !state.pending_tool_calls.is_empty() {
        if state.iterations_exhausted() {
            PlanRoute::Finalize
        } else {
            PlanRoute::ExecuteTools
        }
    } else if state.draft.is_some() {
        PlanRoute::Respond
    } else {
        PlanRoute::Generate
    }
}

pub fn observation_route(state: &TaskState) -> ObservationRoute {
    match &state.observation {
        Some(obs) if obs.wants_replan() && !state.replans_exhausted() => ObservationRoute::Replan,
        _ => ObservationRoute::Generate,
    }
}

pub fn guardrail_route(state: &TaskState) -> GuardrailRoute {
    if !state.validation_errors.is_empty() && !state.retries_exhausted() {
        GuardrailRoute::Retry
    } else {
        GuardrailRoute::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Limits, NextAction, Observation, ToolCallRequest};
    use serde_json::json;

    fn family(name: &str) -> ToolFamily {
        if name == "rag_search" {
            ToolFamily::Rag
        } else {
            ToolFamily::Action
        }
    }

    fn state_with_calls(tools: &[&str]) -> TaskState {
        let mut s = TaskState::new("q", Limits::default());
        s.pending_tool_calls = tools
            .iter()
            .map(|t| ToolCallRequest::new(*t, json!({})))
            .collect();
        s
    }

    #[test]
    fn test_selection_route_from_families() {
        assert_eq!(
            tool_selection_route(&state_with_calls(&["rag_search"]), family),
            ToolSelectionRoute::RagOnly
        );
        assert_eq!(
            tool_selection_route(&state_with_calls(&["weather"]), family),
            ToolSelectionRoute::ToolsOnly
        );
        assert_eq!(
            tool_selection_route(&state_with_calls(&["weather", "rag_search"]), family),
            ToolSelectionRoute::RagAndTools
        );
    }

    #[test]
    fn test_selection_failure_defaults_to_rag_only() {
        let mut s = state_with_calls(&["weather"]);
        s.selection_failed = true;
        assert_eq!(tool_selection_route(&s, family), ToolSelectionRoute::RagOnly);
    }

    #[test]
    fn test_declared_rag_only_corrected_to_combined() {
        let s = state_with_calls(&["rag_search", "fx_rate"]);
        let computed = tool_selection_route(&s, family);
        let (route, corrected) = reconcile_route(Some(ToolSelectionRoute::RagOnly), computed);
        assert_eq!(route, ToolSelectionRoute::RagAndTools);
        assert!(corrected);
        let (route, corrected) = reconcile_route(Some(ToolSelectionRoute::RagAndTools), computed);
        assert_eq!(route, ToolSelectionRoute::RagAndTools);
        assert!(!corrected);
    }

    #[test]
    fn test_observation_cap_saturation_forces_generate() {
        let mut s = TaskState::new("q", Limits::default());
        s.observation = Some(Observation::insufficient(vec!["missing rate".into()]));
        s.replan_count = 1;
        assert_eq!(observation_route(&s), ObservationRoute::Replan);
        s.replan_count = s.limits.max_replans;
        assert_eq!(observation_route(&s), ObservationRoute::Generate);
        assert_eq!(s.replan_count, 2);
    }

    #[test]
    fn test_observation_generate_always_generates() {
        let mut s = TaskState::new("q", Limits::default());
        s.observation = Some(Observation {
            sufficient: false,
            next_action: NextAction::Generate,
            gaps: vec![],
        });
        assert_eq!(observation_route(&s), ObservationRoute::Generate);
        s.observation = None;
        assert_eq!(observation_route(&s), ObservationRoute::Generate);
    }

    #[test]
    fn test_guardrail_route() {
        let mut s = TaskState::new("q", Limits::default());
        assert_eq!(guardrail_route(&s), GuardrailRoute::Continue);
        s.validation_errors = vec!["missing citation".into()];
        assert_eq!(guardrail_route(&s), GuardrailRoute::Retry);
        s.retry_count = s.limits.max_retries;
        assert_eq!(guardrail_route(&s), GuardrailRoute::Continue);
    }

    #[test]
    fn test_plan_route_iteration_cap() {
        let mut s = state_with_calls(&["weather"]);
        assert_eq!(plan_route(&s), PlanRoute::ExecuteTools);
        s.iteration_count = s.limits.max_iterations;
        assert_eq!(plan_route(&s), PlanRoute::Finalize);
        s.pending_tool_calls.clear();
        assert_eq!(plan_route(&s), PlanRoute::Generate);
        s.draft = Some("direct".into());
        assert_eq!(plan_route(&s), PlanRoute::Respond);
    }
}
