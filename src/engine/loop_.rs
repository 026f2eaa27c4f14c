//! 编排引擎主循环
//!
//! [RetrievalPrep] -> Plan(+Tool-Selection) -> ToolExecution(+Reduce) -> Observation -> (Plan | Generate)
//! -> [Guardrail] -> (Generate | Finalize)。
//!
//! 节点只请求下一步，三个计数器的上限由引擎统一强制；上限到达时总是前进（generate / finalize）。
//! 模型调用失败时各节点就地降级，只有「Plan 不可用且没有任何 fallback」才作为错误返回。

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, Limits, Observation, TaskState, ToolCallRequest};
use crate::engine::decision::{
    guardrail_route, observation_route, plan_route, reconcile_route, tool_selection_route,
};
use crate::engine::events::{send_event, EngineEvent};
use crate::engine::generator::{best_effort_answer, Generator};
use crate::engine::guardrail::Guardrail;
use crate::engine::metrics::RunMetrics;
use crate::engine::node::{GuardrailRoute, NodeId, ObservationRoute, PlanRoute, ToolSelectionRoute};
use crate::engine::observer::Observer;
use crate::engine::planner::Planner;
use crate::engine::prep::PrepStep;
use crate::engine::reducer::reduce_round;
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;
use crate::tools::{KnowledgeSearchTool, ToolExecutor};

/// 预览最大字符数
const PREVIEW_CHARS: usize = 200;

/// 引擎运行参数
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub limits: Limits,
    /// 整轮工具执行的截止时间；None 表示只受单次调用超时约束
    pub round_timeout: Option<Duration>,
    /// Plan 失败时 ragOnly 降级所用的检索工具名
    pub rag_tool: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            round_timeout: Some(Duration::from_secs(30)),
            rag_tool: KnowledgeSearchTool::NAME.to_string(),
        }
    }
}

/// 编排引擎：持有各节点与工具执行器，本身无运行期可变状态，可被多个并发运行共享
pub struct Engine {
    planner: Planner,
    observer: Observer,
    generator: Generator,
    executor: ToolExecutor,
    guardrails: Vec<Box<dyn Guardrail>>,
    prep_steps: Vec<Box<dyn PrepStep>>,
    config: EngineConfig,
}

/// 一次运行内传递给各节点的上下文
struct RunCtx<'a> {
    cancel: &'a CancellationToken,
    events: Option<&'a UnboundedSender<EngineEvent>>,
    metrics: RunMetrics,
}

impl RunCtx<'_> {
    fn emit(&self, ev: EngineEvent) {
        send_event(self.events, ev);
    }

    fn degraded(&mut self, node: NodeId, reason: String) {
        tracing::warn!(node = %node, reason = %reason, "node degraded");
        self.metrics.degradations.push(format!("{node}: {reason}"));
        self.emit(EngineEvent::Degraded { node, reason });
    }

    fn cap_reached(&self, counter: &str, limit: u32) {
        tracing::warn!(counter, limit, "cap reached, forcing forward progress");
        self.emit(EngineEvent::CapReached {
            counter: counter.to_string(),
            limit,
        });
    }

    /// 取消令牌触发时立即放弃当前等待
    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output, AgentError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

impl Engine {
    /// 使用默认提示词构建三个 LLM 节点；不带 Guardrail 与前置步骤
    pub fn new(llm: Arc<dyn LlmClient>, executor: ToolExecutor, config: EngineConfig) -> Self {
        Self {
            planner: Planner::from_default_prompt(llm.clone()),
            observer: Observer::from_default_prompt(llm.clone()),
            generator: Generator::from_default_prompt(llm),
            executor,
            guardrails: Vec::new(),
            prep_steps: Vec::new(),
            config,
        }
    }

    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_generator(mut self, generator: Generator) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_guardrail(mut self, guardrail: impl Guardrail + 'static) -> Self {
        self.guardrails.push(Box::new(guardrail));
        self
    }

    pub fn with_prep_step(mut self, step: impl PrepStep + 'static) -> Self {
        self.prep_steps.push(Box::new(step));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// 驱动状态机直到 Finalize。返回时 state.final_answer() 一定有值。
    pub async fn run(
        &self,
        state: &mut TaskState,
        cancel: &CancellationToken,
        events: Option<&UnboundedSender<EngineEvent>>,
    ) -> Result<RunMetrics, AgentError> {
        let started = Instant::now();
        let budget = state.limits.max_node_visits();
        let mut ctx = RunCtx {
            cancel,
            events,
            metrics: RunMetrics::default(),
        };

        let mut node = if self.prep_steps.is_empty() {
            NodeId::Plan
        } else {
            NodeId::RetrievalPrep
        };
        loop {
            if cancel.is_cancelled() {
                tracing::info!(node = %node, "run cancelled");
                return Err(AgentError::Cancelled);
            }
            // 决策函数已保证有限步终止，这里只是兜底
            if node != NodeId::Finalize && ctx.metrics.node_visits + 1 >= budget {
                tracing::error!(node = %node, budget, "node visit budget exhausted, finalizing");
                ctx.cap_reached("node_visits", budget);
                node = NodeId::Finalize;
            }

            ctx.metrics.visit(node);
            tracing::debug!(node = %node, visit = ctx.metrics.node_visits, "enter node");
            ctx.emit(EngineEvent::NodeEntered {
                node,
                visit: ctx.metrics.node_visits,
            });

            let (next, selection, corrected) = match node {
                NodeId::RetrievalPrep => {
                    self.prep_node(state, &mut ctx).await?;
                    (NodeId::Plan, None, false)
                }
                NodeId::Plan => self.plan_node(state, &mut ctx).await?,
                NodeId::ToolExecution => (self.tool_node(state, &mut ctx).await?, None, false),
                NodeId::Observation => (self.observation_node(state, &mut ctx).await?, None, false),
                NodeId::Generate => (self.generate_node(state, &mut ctx).await?, None, false),
                NodeId::Guardrail => (self.guardrail_node(state, &mut ctx), None, false),
                NodeId::Finalize => {
                    self.finalize_node(state);
                    break;
                }
            };
            ctx.emit(EngineEvent::RouteDecided {
                from: node,
                to: next,
                selection,
                corrected,
            });
            node = next;
        }

        let mut metrics = ctx.metrics;
        metrics.iterations = state.iteration_count;
        metrics.replans = state.replan_count;
        metrics.retries = state.retry_count;
        metrics.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            node_visits = metrics.node_visits,
            iterations = metrics.iterations,
            replans = metrics.replans,
            retries = metrics.retries,
            tool_errors = state.tool_errors.len(),
            elapsed_ms = metrics.elapsed_ms,
            "run finished"
        );
        send_event(
            events,
            EngineEvent::Finished {
                node_visits: metrics.node_visits,
                elapsed_ms: metrics.elapsed_ms,
            },
        );
        Ok(metrics)
    }

    async fn prep_node(&self, state: &mut TaskState, ctx: &mut RunCtx<'_>) -> Result<(), AgentError> {
        for step in &self.prep_steps {
            match ctx.cancellable(step.prepare(state)).await? {
                Ok(Some(out)) => {
                    state.prep_context.push(out.context);
                    state.prep_results.extend(out.sources);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(step = step.name(), error = %e, "prep step failed, skipped"),
            }
        }
        Ok(())
    }

    /// Plan + Tool-Selection：产出本轮调用并决定去向
    async fn plan_node(
        &self,
        state: &mut TaskState,
        ctx: &mut RunCtx<'_>,
    ) -> Result<(NodeId, Option<ToolSelectionRoute>, bool), AgentError> {
        state.selection_failed = false;
        state.pending_tool_calls.clear();

        let planned = ctx
            .cancellable(self.planner.plan(state, self.executor.registry()))
            .await?;
        let declared = match planned {
            Ok(out) => {
                let declared = out.route;
                let answer = out.answer.clone();
                state.pending_tool_calls = out.into_requests();
                if state.pending_tool_calls.is_empty() {
                    if let Some(answer) = answer.filter(|a| !a.trim().is_empty()) {
                        state.draft = Some(answer.trim().to_string());
                    }
                }
                declared
            }
            Err(e) => {
                self.plan_fallback(state, ctx, e)?;
                None
            }
        };

        let (selection, corrected) = if state.pending_tool_calls.is_empty() {
            (None, false)
        } else {
            let computed = tool_selection_route(state, |t| self.executor.family_of(t));
            let (route, corrected) = reconcile_route(declared, computed);
            if corrected {
                tracing::warn!(
                    declared = ?declared,
                    actual = ?route,
                    "declared tool-selection route disagrees with selected tools, corrected"
                );
                ctx.metrics.route_corrections += 1;
            }
            ctx.metrics.routes.push(route);
            (Some(route), corrected)
        };

        let next = match plan_route(state) {
            PlanRoute::ExecuteTools => {
                state.iteration_count += 1;
                NodeId::ToolExecution
            }
            PlanRoute::Finalize => {
                ctx.cap_reached("iterations", state.limits.max_iterations);
                state.pending_tool_calls.clear();
                NodeId::Finalize
            }
            PlanRoute::Respond => self.after_draft(),
            PlanRoute::Generate => NodeId::Generate,
        };
        Ok((next, selection, corrected))
    }

    /// 规划失败：优先退化为一次 ragOnly 检索；没有检索工具时，尚无任何信息则视为致命错误
    fn plan_fallback(
        &self,
        state: &mut TaskState,
        ctx: &mut RunCtx<'_>,
        err: LlmError,
    ) -> Result<(), AgentError> {
        if self.executor.registry().contains(&self.config.rag_tool) {
            ctx.degraded(NodeId::Plan, format!("{err}; falling back to {}", self.config.rag_tool));
            state.selection_failed = true;
            state.pending_tool_calls = vec![ToolCallRequest::new(
                self.config.rag_tool.clone(),
                serde_json::json!({ "query": state.query }),
            )];
            return Ok(());
        }
        let gathered_nothing = state.tools_called.is_empty()
            && state.prep_context.is_empty()
            && state.replan_count == 0;
        if gathered_nothing && !matches!(err, LlmError::SchemaViolation(_)) {
            tracing::error!(error = %err, "planning unavailable and no fallback configured");
            return Err(AgentError::ExternalService(err));
        }
        ctx.degraded(NodeId::Plan, format!("{err}; generating from available context"));
        Ok(())
    }

    async fn tool_node(&self, state: &mut TaskState, ctx: &mut RunCtx<'_>) -> Result<NodeId, AgentError> {
        state.round += 1;
        state.tool_results.clear();
        let round = state.round;
        let calls = state.pending_tool_calls.clone();
        for call in &calls {
            ctx.emit(EngineEvent::ToolCall {
                round,
                tool: call.tool.clone(),
                args: call.args.clone(),
            });
        }

        let started = Instant::now();
        let results = ctx
            .cancellable(self.executor.execute_round(round, &calls, self.config.round_timeout))
            .await?;
        for r in &results {
            ctx.emit(EngineEvent::ToolResult {
                round,
                tool: r.tool.clone(),
                status: r.status,
                latency_ms: r.latency_ms,
                preview: r.render().chars().take(PREVIEW_CHARS).collect(),
            });
        }

        let round_metrics = reduce_round(state, results, started.elapsed());
        tracing::info!(
            round,
            dispatched = round_metrics.dispatched,
            succeeded = round_metrics.succeeded,
            failed = round_metrics.failed,
            timed_out = round_metrics.timed_out,
            elapsed_ms = round_metrics.elapsed_ms,
            "round reduced"
        );
        ctx.metrics.rounds.push(round_metrics);
        Ok(NodeId::Observation)
    }

    async fn observation_node(
        &self,
        state: &mut TaskState,
        ctx: &mut RunCtx<'_>,
    ) -> Result<NodeId, AgentError> {
        let observation = match ctx.cancellable(self.observer.observe(state)).await? {
            Ok(obs) => obs,
            Err(e) => {
                ctx.degraded(NodeId::Observation, format!("{e}; assuming sufficient"));
                Observation::sufficient()
            }
        };
        state.observation = Some(observation);

        Ok(match observation_route(state) {
            ObservationRoute::Replan => {
                state.replan_count += 1;
                NodeId::Plan
            }
            ObservationRoute::Generate => {
                if state.observation.as_ref().is_some_and(|o| o.wants_replan()) {
                    ctx.cap_reached("replans", state.limits.max_replans);
                }
                NodeId::Generate
            }
        })
    }

    async fn generate_node(
        &self,
        state: &mut TaskState,
        ctx: &mut RunCtx<'_>,
    ) -> Result<NodeId, AgentError> {
        // 上一次校验的问题只作为本次生成的反馈，不跨次保留
        let feedback = std::mem::take(&mut state.validation_errors);
        let draft = match ctx.cancellable(self.generator.generate(state, &feedback)).await? {
            Ok(text) => text,
            Err(e) => {
                ctx.degraded(NodeId::Generate, format!("{e}; using best-effort answer"));
                best_effort_answer(state)
            }
        };
        state.draft = Some(draft);
        Ok(self.after_draft())
    }

    fn guardrail_node(&self, state: &mut TaskState, ctx: &mut RunCtx<'_>) -> NodeId {
        let draft = state.draft.clone().unwrap_or_default();
        state.validation_errors = self
            .guardrails
            .iter()
            .flat_map(|g| {
                let errors = g.check(&draft, state);
                if !errors.is_empty() {
                    tracing::info!(guardrail = g.name(), count = errors.len(), "draft rejected");
                }
                errors
            })
            .collect();

        match guardrail_route(state) {
            GuardrailRoute::Retry => {
                state.retry_count += 1;
                NodeId::Generate
            }
            GuardrailRoute::Continue => {
                if !state.validation_errors.is_empty() {
                    ctx.cap_reached("guardrail_retries", state.limits.max_retries);
                }
                NodeId::Finalize
            }
        }
    }

    fn finalize_node(&self, state: &mut TaskState) {
        let answer = state
            .draft
            .take()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| best_effort_answer(state));
        state.push_message(Message::assistant(answer.clone()));
        if !state.set_final_answer(answer) {
            tracing::warn!("final answer already set, keeping the first one");
        }
    }

    fn after_draft(&self) -> NodeId {
        if self.guardrails.is_empty() {
            NodeId::Finalize
        } else {
            NodeId::Guardrail
        }
    }
}
