//! Sub-agent orchestrator: bounded child loops with restricted tool sets.

mod orchestrator;
mod tools;
mod types;

pub use orchestrator::{SpawnRequest, SubAgentOrchestrator};
pub use tools::{await_tasks_tool, cancel_task_tool, sub_agent_tools, task_tool};
pub use types::{SubAgentStatus, SubAgentTask, SubAgentType, RECURSIVE_TOOLS};
