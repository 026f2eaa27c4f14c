//! 节点与路由：状态机的状态（NodeId）以及各决策点的带标签路由结果

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 状态机节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    /// 可选前置步骤（工具清单 / 检索预热），静态前缀，不参与循环
    RetrievalPrep,
    /// 规划 + 工具选择
    Plan,
    /// 并发执行本轮工具调用，随后 Reduce
    ToolExecution,
    Observation,
    Generate,
    Guardrail,
    Finalize,
}

impl NodeId {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeId::RetrievalPrep => "retrieval_prep",
            NodeId::Plan => "plan",
            NodeId::ToolExecution => "tool_execution",
            NodeId::Observation => "observation",
            NodeId::Generate => "generate",
            NodeId::Guardrail => "guardrail",
            NodeId::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool-Selection 路由：本轮要调用的能力族组合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ToolSelectionRoute {
    #[serde(alias = "rag_only")]
    RagOnly,
    #[serde(alias = "tools_only")]
    ToolsOnly,
    #[serde(alias = "rag_and_tools")]
    RagAndTools,
}

/// Plan 节点之后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanRoute {
    ExecuteTools,
    /// 规划阶段直接给出回答，跳过 Generate
    Respond,
    /// 没有工具可调用，直接生成
    Generate,
    /// 迭代上限已到但仍请求工具，强制收尾
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationRoute {
    Replan,
    Generate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailRoute {
    Retry,
    Continue,
}
