//! Tool execution engine: lookup, plan-mode filter, validation, isolation.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::arguments::ToolArguments;
use super::registry::ToolRegistry;
use super::tool::ToolExecutionContext;
use super::validation::validate_arguments;
use crate::provider::format::tool_result_to_string;
use crate::types::ToolOutput;

/// Tools that never mutate anything.
pub const READ_ONLY_TOOLS: &[&str] = &["Read", "Glob", "Grep", "WebSearch", "Skill"];

/// Tools allowed while the session is in plan mode.
pub const PLAN_MODE_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "WebSearch",
    "Skill",
    "AskUser",
    "ProposePlan",
];

/// Runs registered tools. Every failure comes back as an error result.
#[derive(Debug, Clone)]
pub struct ToolEngine {
    registry: ToolRegistry,
}

impl ToolEngine {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(
        &self,
        name: &str,
        input: &Map<String, Value>,
        ctx: &ToolExecutionContext,
    ) -> ToolOutput {
        let Some(tool) = self.registry.get(name) else {
            return ToolOutput::error(format!("Unknown tool: {name}"));
        };
        if ctx.plan_mode && !PLAN_MODE_TOOLS.contains(&name) {
            return ToolOutput::error(format!(
                "Tool '{name}' is not available in plan mode. Only read-only tools may run until the plan is approved."
            ));
        }

        let args = Value::Object(input.clone());
        if let Err(message) = validate_arguments(&args, &tool.parameters().schema) {
            return ToolOutput::error(format!("Invalid arguments for {name}: {message}"));
        }

        let started = Instant::now();
        let args = ToolArguments::new(args);
        let outcome = AssertUnwindSafe(tool.execute(&args, ctx))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let output = match outcome {
            Ok(Ok(value)) => ToolOutput::success(tool_result_to_string(&value)),
            Ok(Err(err)) => {
                debug!(tool = name, error = %err, "tool returned error");
                ToolOutput::error(err.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(tool = name, reason = %reason, "tool panicked");
                ToolOutput::error(format!("Tool '{name}' panicked: {reason}"))
            }
        };
        output.with_metadata(json!({ "duration_ms": duration_ms }))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConductorError;
    use crate::tools::{AgentTool, AgentToolParameters};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn engine_with(tools: Vec<Arc<dyn crate::tools::Tool>>) -> ToolEngine {
        ToolEngine::new(ToolRegistry::builder().tools(tools).build().unwrap())
    }

    fn ctx() -> ToolExecutionContext {
        ToolExecutionContext::new("s", std::env::temp_dir())
    }

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let out = engine_with(vec![]).execute("Nope", &Map::new(), &ctx()).await;
        assert!(out.is_error);
        assert_eq!(out.content, "Unknown tool: Nope");
    }

    #[tokio::test]
    async fn string_results_pass_through_and_carry_duration() {
        let echo = AgentTool::new(
            "Echo",
            "echo",
            AgentToolParameters::object().string("text", "t", true).build(),
            |args, _| async move { Ok(Value::String(args.get_str("text")?.to_string())) },
        );
        let out = engine_with(vec![Arc::new(echo)])
            .execute("Echo", &input(json!({"text": "hello"})), &ctx())
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "hello");
        assert!(out.metadata.unwrap()["duration_ms"].is_u64());
    }

    // -----------------------------------------------------------------------
    // Failure isolation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn tool_errors_become_error_results() {
        let failing = AgentTool::new("Fail", "fails", AgentToolParameters::empty(), |_, _| async {
            Err(ConductorError::tool("Fail", "disk on fire"))
        });
        let out = engine_with(vec![Arc::new(failing)])
            .execute("Fail", &Map::new(), &ctx())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("disk on fire"));
    }

    #[tokio::test]
    async fn panics_are_caught() {
        let panicking = AgentTool::new("Boom", "panics", AgentToolParameters::empty(), |_, _| async {
            if true {
                panic!("kaboom");
            }
            Ok(Value::Null)
        });
        let out = engine_with(vec![Arc::new(panicking)])
            .execute("Boom", &Map::new(), &ctx())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("kaboom"));
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_tool() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let tool = AgentTool::new(
            "Read",
            "read",
            AgentToolParameters::object().string("path", "p", true).build(),
            move |_, _| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            },
        );
        let out = engine_with(vec![Arc::new(tool)])
            .execute("Read", &Map::new(), &ctx())
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("missing required field 'path'"));
        assert!(!ran.load(Ordering::SeqCst));
    }

    // -----------------------------------------------------------------------
    // Plan mode
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn plan_mode_blocks_mutating_tools_without_side_effects() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let write = AgentTool::new("Write", "write", AgentToolParameters::empty(), move |_, _| {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });
        let mut plan_ctx = ctx();
        plan_ctx.plan_mode = true;
        let out = engine_with(vec![Arc::new(write)])
            .execute("Write", &Map::new(), &plan_ctx)
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("plan mode"));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
