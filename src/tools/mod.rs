//! 工具层：工具契约、注册表、并发执行器与参考工具

pub mod echo;
pub mod executor;
pub mod knowledge;
pub mod registry;
pub mod schema;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use knowledge::{Document, KnowledgeSearchTool};
pub use registry::{Tool, ToolFamily, ToolOutput, ToolRegistry};
pub use schema::tool_call_schema_json;
