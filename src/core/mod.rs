pub mod builder;
pub mod error;
pub mod retry;
pub mod state;
pub mod task_scheduler;

pub use builder::{create_llm_from_config, AgentBuilder};
pub use error::{AgentError, ErrorKind};
pub use retry::{RetryDecision, RetryPolicy, DEFAULT_RETRYABLE_STATUS_CODES};
pub use state::{ErrorRecord, Limits, NextAction, Observation, TaskState, ToolCallRequest, ToolResult, ToolStatus};
pub use task_scheduler::{RoundPool, TaskScheduler};
