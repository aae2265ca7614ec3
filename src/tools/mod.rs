//! Tool system: definitions, registry, execution engine and built-ins.

pub mod arguments;
pub mod builtin;
pub mod engine;
pub mod registry;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use engine::{ToolEngine, PLAN_MODE_TOOLS, READ_ONLY_TOOLS};
pub use registry::{ToolRegistry, ToolRegistryBuilder};
pub use tool::{AgentTool, Tool, ToolExecutionContext};
pub use types::AgentToolParameters;
pub use validation::validate_arguments;
