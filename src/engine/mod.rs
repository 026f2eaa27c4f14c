//! 编排引擎：节点、纯决策函数、Reduce 与主循环

pub mod decision;
pub mod events;
pub mod generator;
pub mod guardrail;
pub mod loop_;
pub mod metrics;
pub mod node;
pub mod observer;
pub mod planner;
pub mod prep;
pub mod prompt;
pub mod reducer;

pub use decision::{guardrail_route, observation_route, plan_route, reconcile_route, tool_selection_route};
pub use events::EngineEvent;
pub use generator::{best_effort_answer, Generator};
pub use guardrail::{CitationGuardrail, Guardrail, NonEmptyGuardrail};
pub use loop_::{Engine, EngineConfig};
pub use metrics::{RoundMetrics, RunMetrics};
pub use node::{GuardrailRoute, NodeId, ObservationRoute, PlanRoute, ToolSelectionRoute};
pub use observer::{ObservationOutput, Observer};
pub use planner::{PlanOutput, PlannedCall, Planner};
pub use prep::{KnowledgePrefetch, PrepOutput, PrepStep, ToolManifestPrep};
pub use reducer::reduce_round;
