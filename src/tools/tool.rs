//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::arguments::ToolArguments;
use super::types::AgentToolParameters;
use crate::agent_loop::events::EventEmitter;
use crate::config::ToolSettings;
use crate::error::ConductorError;
use crate::types::{PermissionLevel, ToolDefinition};

/// Context available during tool execution.
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Session scope the call runs in; sub-agents spawned here share it.
    pub session_id: String,
    /// Root that relative paths resolve against. Tools never leave it.
    pub working_dir: PathBuf,
    pub plan_mode: bool,
    pub cancel: CancellationToken,
    pub settings: ToolSettings,
    pub events: EventEmitter,
}

impl ToolExecutionContext {
    pub fn new(session_id: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        let session_id = session_id.into();
        Self {
            tool_call_id: String::new(),
            tool_name: String::new(),
            events: EventEmitter::noop(session_id.clone()),
            session_id,
            working_dir: working_dir.into(),
            plan_mode: false,
            cancel: CancellationToken::new(),
            settings: ToolSettings::default(),
        }
    }

    /// Same session, addressed to one call.
    pub fn for_call(&self, tool_call_id: &str, tool_name: &str) -> Self {
        let mut ctx = self.clone();
        ctx.tool_call_id = tool_call_id.to_string();
        ctx.tool_name = tool_name.to_string();
        ctx
    }
}

/// Core tool trait; implement to create custom tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema parameters.
    fn parameters(&self) -> &AgentToolParameters;

    /// Default permission level; config overrides win at registry build.
    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Ask
    }

    /// A successful call ends the turn (plan proposals).
    fn ends_turn(&self) -> bool {
        false
    }

    /// Execute the tool with parsed arguments.
    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<Value, ConductorError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters().schema.clone(),
            permission_level: self.permission_level(),
        }
    }
}

type ToolHandler = dyn Fn(ToolArguments, ToolExecutionContext) -> Pin<Box<dyn Future<Output = Result<Value, ConductorError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
pub struct AgentTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    permission_level: PermissionLevel,
    ends_turn: bool,
    handler: Arc<ToolHandler>,
}

impl AgentTool {
    /// Create a tool from a closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: AgentToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ConductorError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            permission_level: PermissionLevel::Ask,
            ends_turn: false,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    pub fn with_permission_level(mut self, level: PermissionLevel) -> Self {
        self.permission_level = level;
        self
    }

    pub fn ending_turn(mut self) -> Self {
        self.ends_turn = true;
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    fn permission_level(&self) -> PermissionLevel {
        self.permission_level
    }

    fn ends_turn(&self) -> bool {
        self.ends_turn
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<Value, ConductorError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .field("permission_level", &self.permission_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closure_tool_receives_args_and_context() {
        let tool = AgentTool::new(
            "Echo",
            "Echo the input",
            AgentToolParameters::object().string("text", "Text", true).build(),
            |args, ctx| async move {
                Ok(json!({"text": args.get_str("text")?, "call": ctx.tool_call_id}))
            },
        )
        .with_permission_level(PermissionLevel::Auto);

        let ctx = ToolExecutionContext::new("s", "/tmp").for_call("t1", "Echo");
        let out = tool
            .execute(&ToolArguments::new(json!({"text": "hi"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({"text": "hi", "call": "t1"}));

        let def = tool.definition();
        assert_eq!(def.name, "Echo");
        assert_eq!(def.permission_level, PermissionLevel::Auto);
        assert!(!tool.ends_turn());
    }
}
