//! 引擎过程事件：用于流式展示节点切换、路由决策、工具调用与降级

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::ToolStatus;
use crate::engine::node::{NodeId, ToolSelectionRoute};

/// 可序列化为 JSON 供前端展示
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    NodeEntered { node: NodeId, visit: u32 },
    /// 节点之间的一次转移；Plan 之后附带本轮 Tool-Selection 路由
    RouteDecided {
        from: NodeId,
        to: NodeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        selection: Option<ToolSelectionRoute>,
        corrected: bool,
    },
    ToolCall { round: u32, tool: String, args: Value },
    /// 工具返回（预览，避免过长）
    ToolResult {
        round: u32,
        tool: String,
        status: ToolStatus,
        latency_ms: u64,
        preview: String,
    },
    /// 计数器到达上限，引擎强制前进
    CapReached { counter: String, limit: u32 },
    /// 某节点失败后走了降级路径
    Degraded { node: NodeId, reason: String },
    Finished { node_visits: u32, elapsed_ms: u64 },
}

pub(crate) fn send_event(tx: Option<&UnboundedSender<EngineEvent>>, ev: EngineEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let ev = EngineEvent::RouteDecided {
            from: NodeId::Plan,
            to: NodeId::ToolExecution,
            selection: Some(ToolSelectionRoute::RagAndTools),
            corrected: true,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "route_decided");
        assert_eq!(v["from"], "plan");
        assert_eq!(v["selection"], "ragAndTools");
    }
}
