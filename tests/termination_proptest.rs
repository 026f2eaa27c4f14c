//! 终止性属性测试：任意上限组合 + 任意模型回复序列，引擎都在有限节点访问内到达 Finalize

use std::sync::Arc;
use std::time::Duration;

use hive::core::{AgentError, Limits, TaskState};
use hive::engine::{CitationGuardrail, Engine, EngineConfig, NodeId, NonEmptyGuardrail};
use hive::llm::{LlmError, MockLlmClient, MockReply};
use hive::tools::{Document, EchoTool, KnowledgeSearchTool, ToolExecutor, ToolRegistry};
use proptest::prelude::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn reply_strategy() -> impl Strategy<Value = MockReply> {
    prop_oneof![
        Just(MockReply::Json(json!({
            "route": "toolsOnly",
            "tool_calls": [{"tool": "echo", "args": {"text": "x"}}]
        }))),
        Just(MockReply::Json(json!({
            "route": "ragOnly",
            "tool_calls": [
                {"tool": "knowledge_search", "args": {"query": "alpha"}},
                {"tool": "echo", "args": {"text": "y"}}
            ]
        }))),
        Just(MockReply::Json(json!({"answer": "direct"}))),
        Just(MockReply::Json(json!({"sufficient": false, "next_action": "replan"}))),
        Just(MockReply::Json(json!({"sufficient": true}))),
        Just(MockReply::Text("".into())),
        Just(MockReply::Text("answer [alpha]".into())),
        Just(MockReply::Text("answer [bogus]".into())),
        Just(MockReply::Fail(LlmError::Timeout)),
        Just(MockReply::Fail(LlmError::SchemaViolation("bad".into()))),
    ]
}

fn registry(with_rag: bool) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(EchoTool);
    if with_rag {
        reg.register(KnowledgeSearchTool::new(vec![Document::new(
            "alpha",
            "Alpha",
            "alpha facts",
        )]));
    }
    reg
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn engine_always_terminates_within_bound(
        m in 0u32..4,
        r in 0u32..4,
        g in 0u32..4,
        with_rag in any::<bool>(),
        script in prop::collection::vec(reply_strategy(), 0..40),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let limits = Limits { max_iterations: m, max_replans: r, max_retries: g };
        let mock = Arc::new(MockLlmClient::scripted(script));
        let exec = ToolExecutor::new(registry(with_rag), Duration::from_secs(1));
        let engine = Engine::new(mock, exec, EngineConfig { limits, ..EngineConfig::default() })
            .with_guardrail(NonEmptyGuardrail)
            .with_guardrail(CitationGuardrail::new(["knowledge_search"]));
        let mut state = TaskState::new("alpha question", limits);

        let outcome = rt.block_on(engine.run(&mut state, &CancellationToken::new(), None));

        match outcome {
            Ok(metrics) => {
                prop_assert!(state.final_answer().is_some());
                prop_assert!(metrics.node_visits <= limits.max_node_visits());
                prop_assert_eq!(metrics.trace.last(), Some(&NodeId::Finalize));
                prop_assert!(state.iteration_count <= m);
                prop_assert!(state.replan_count <= r);
                prop_assert!(state.retry_count <= g);
                let dispatched: usize = metrics.rounds.iter().map(|x| x.dispatched).sum();
                prop_assert_eq!(state.tools_called.len(), dispatched);
            }
            // 只有「没有检索工具可降级」时 Plan 失败才允许使整次运行失败
            Err(AgentError::ExternalService(_)) => {
                prop_assert!(!with_rag);
                prop_assert!(state.tools_called.is_empty());
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }
}
