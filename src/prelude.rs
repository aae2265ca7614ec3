//! Convenience re-exports for common use.

pub use crate::agent_loop::{
    AgentEvent, AgentEventPayload, AgentRunner, EventEmitter, TurnFailure, TurnOptions,
    TurnOutcome, TurnResult,
};
pub use crate::config::{ConductorConfig, RuntimeSettings};
pub use crate::error::{ConductorError, ErrorCode, NormalizedError, Result};
pub use crate::permissions::PermissionGate;
pub use crate::provider::{Backend, ModelTransport, ProtocolAdapter};
pub use crate::runtime::{AgentRuntime, ToolSet, TurnHandle};
pub use crate::subagents::{SubAgentStatus, SubAgentTask, SubAgentType};
pub use crate::tools::{AgentTool, AgentToolParameters, Tool, ToolArguments, ToolRegistry};
pub use crate::types::{CanonicalMessage, ContentBlock, PermissionLevel, Role, ToolCall, Usage};
