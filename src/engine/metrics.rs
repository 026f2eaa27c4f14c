//! 运行指标：每轮工具执行统计 + 整次运行的节点访问与计数器快照

use serde::Serialize;

use crate::engine::node::{NodeId, ToolSelectionRoute};

/// 单轮工具执行统计（由 Reduce 步骤产出）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundMetrics {
    pub round: u32,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub elapsed_ms: u64,
}

/// 整次运行的诊断信息，随 RunOutput 返回给调用方
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    pub node_visits: u32,
    /// 节点访问轨迹（含 Finalize）
    pub trace: Vec<NodeId>,
    pub iterations: u32,
    pub replans: u32,
    pub retries: u32,
    pub rounds: Vec<RoundMetrics>,
    /// 每轮最终采用的 Tool-Selection 路由
    pub routes: Vec<ToolSelectionRoute>,
    /// 声明路由与实际选择不一致而被纠正的次数
    pub route_corrections: u32,
    /// 降级发生的位置与原因
    pub degradations: Vec<String>,
    pub elapsed_ms: u64,
}

impl RunMetrics {
    pub(crate) fn visit(&mut self, node: NodeId) {
        self.node_visits += 1;
        self.trace.push(node);
    }

    pub fn visits_of(&self, node: NodeId) -> usize {
        self.trace.iter().filter(|n| **n == node).count()
    }

    pub fn tool_calls(&self) -> usize {
        self.rounds.iter().map(|r| r.dispatched).sum()
    }
}
