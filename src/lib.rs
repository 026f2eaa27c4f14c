//! Hive - 有界的 LLM 智能体编排引擎
//!
//! 模块划分：
//! - **agent**: Run Driver，单次运行入口（会话进、答案与诊断出）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 任务状态、错误分类、重试策略、工具并发调度、Agent 装配
//! - **engine**: 状态机节点、纯决策函数、Reduce 与主循环
//! - **llm**: 模型网关抽象与实现（OpenAI 兼容 / Mock）与调用方重试
//! - **memory**: 对话消息与会话记忆
//! - **observability**: tracing 初始化
//! - **tools**: 工具契约、注册表、并发执行器与参考工具

pub mod agent;
pub mod config;
pub mod core;
pub mod engine;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use agent::{Agent, RunOutput, ToolCallRecord};
pub use crate::core::{AgentBuilder, AgentError};
pub use engine::{Engine, EngineConfig, EngineEvent};
