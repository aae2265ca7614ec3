//! Tools the parent loop uses to drive sub-agents.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use super::orchestrator::{SpawnRequest, SubAgentOrchestrator};
use super::types::{SubAgentTask, SubAgentType};
use crate::error::ConductorError;
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;
use crate::types::PermissionLevel;

/// `Task`, `AwaitTasks` and `CancelTask`.
pub fn sub_agent_tools(orchestrator: SubAgentOrchestrator) -> Vec<Arc<dyn Tool>> {
    vec![
        task_tool(orchestrator.clone()),
        await_tasks_tool(orchestrator.clone()),
        cancel_task_tool(orchestrator),
    ]
}

pub fn task_tool(orchestrator: SubAgentOrchestrator) -> Arc<dyn Tool> {
    let types: Vec<String> = SubAgentType::ALL.iter().map(ToString::to_string).collect();
    let type_refs: Vec<&str> = types.iter().map(String::as_str).collect();
    Arc::new(
        AgentTool::new(
            "Task",
            "Launch a sub-agent that works on a task in the background. \
             bash: shell commands only. explore: read-only search of the workspace. \
             plan: read-only investigation ending in a plan. general-purpose: every tool. \
             Collect results with AwaitTasks.",
            AgentToolParameters::object()
                .string_enum("subagent_type", "Kind of sub-agent", &type_refs, true)
                .string("prompt", "Complete instructions for the sub-agent", true)
                .integer("max_turns", "Model calls the sub-agent may make", false)
                .build(),
            move |args, ctx: ToolExecutionContext| {
                let orchestrator = orchestrator.clone();
                async move {
                    let raw_type = args.get_str("subagent_type")?;
                    let task_type: SubAgentType = raw_type.parse().map_err(|_| {
                        ConductorError::tool("Task", format!("unknown subagent_type '{raw_type}'"))
                    })?;
                    let request = SpawnRequest::builder()
                        .task_type(task_type)
                        .prompt(args.get_str("prompt")?)
                        .maybe_max_turns(args.get_u64_opt("max_turns").map(|n| n as usize))
                        .scope(ctx.session_id.clone())
                        .working_dir(ctx.working_dir.clone())
                        .events(ctx.events.clone())
                        .parent_cancel(ctx.cancel.clone())
                        .build();
                    let task_id = orchestrator.spawn(request);
                    Ok(json!({ "task_id": task_id, "status": "running" }))
                }
            },
        )
        .with_permission_level(PermissionLevel::Auto),
    )
}

pub fn await_tasks_tool(orchestrator: SubAgentOrchestrator) -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "AwaitTasks",
            "Wait for this session's sub-agents to finish and return their results. \
             Tasks still running when the timeout elapses are reported as running.",
            AgentToolParameters::object()
                .integer("timeout_secs", "Maximum seconds to wait", false)
                .build(),
            move |args, ctx: ToolExecutionContext| {
                let orchestrator = orchestrator.clone();
                async move {
                    let timeout = args.get_u64_opt("timeout_secs").map(Duration::from_secs);
                    let tasks = tokio::select! {
                        tasks = orchestrator.await_all(&ctx.session_id, timeout) => tasks,
                        _ = ctx.cancel.cancelled() => {
                            return Err(ConductorError::tool("AwaitTasks", "cancelled while waiting"));
                        }
                    };
                    if tasks.is_empty() {
                        return Ok(Value::String("No pending sub-agent tasks.".into()));
                    }
                    Ok(Value::Array(tasks.iter().map(task_report).collect()))
                }
            },
        )
        .with_permission_level(PermissionLevel::Auto),
    )
}

pub fn cancel_task_tool(orchestrator: SubAgentOrchestrator) -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "CancelTask",
            "Cancel a running sub-agent.",
            AgentToolParameters::object()
                .string("task_id", "Id returned by Task", true)
                .build(),
            move |args, _ctx| {
                let orchestrator = orchestrator.clone();
                async move {
                    let task_id = args.get_str("task_id")?;
                    let cancelled = orchestrator.cancel(task_id);
                    Ok(json!({ "task_id": task_id, "cancelled": cancelled }))
                }
            },
        )
        .with_permission_level(PermissionLevel::Auto),
    )
}

fn task_report(task: &SubAgentTask) -> Value {
    json!({
        "task_id": task.id,
        "type": task.task_type,
        "status": task.status,
        "turns": task.turns,
        "result": task.result,
        "error": task.error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeSettings;
    use crate::permissions::PermissionGate;
    use crate::provider::anthropic::AnthropicAdapter;
    use crate::provider::{Backend, ModelTransport};
    use crate::tools::arguments::ToolArguments;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    struct Echo;

    #[async_trait]
    impl ModelTransport for Echo {
        async fn send(&self, _request: &Value) -> crate::error::Result<Value> {
            Ok(json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "all clear"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 1, "output_tokens": 1}
            }))
        }

        async fn send_stream(
            &self,
            _request: &Value,
        ) -> crate::error::Result<BoxStream<'static, crate::error::Result<Value>>> {
            Err(ConductorError::Configuration("streaming not scripted".into()))
        }
    }

    fn orchestrator() -> SubAgentOrchestrator {
        let mut settings = RuntimeSettings::default();
        settings.agent.stream = false;
        settings.subagents.poll_interval_ms = 10;
        SubAgentOrchestrator::new(
            Backend::new(Arc::new(AnthropicAdapter::new()), Arc::new(Echo)),
            ToolRegistry::default(),
            PermissionGate::new(settings.permissions.clone()),
            Arc::new(settings),
        )
    }

    #[tokio::test]
    async fn task_then_await_reports_result() {
        let orchestrator = orchestrator();
        let ctx = ToolExecutionContext::new("session-1", "/tmp");
        let spawned = task_tool(orchestrator.clone())
            .execute(
                &ToolArguments::new(json!({"subagent_type": "explore", "prompt": "scan"})),
                &ctx,
            )
            .await
            .unwrap();
        let task_id = spawned["task_id"].as_str().unwrap().to_string();

        let report = await_tasks_tool(orchestrator.clone())
            .execute(&ToolArguments::new(json!({"timeout_secs": 5})), &ctx)
            .await
            .unwrap();
        assert_eq!(report[0]["task_id"], task_id.as_str());
        assert_eq!(report[0]["status"], "completed");
        assert_eq!(report[0]["result"], "all clear");

        let again = await_tasks_tool(orchestrator)
            .execute(&ToolArguments::new(json!({})), &ctx)
            .await
            .unwrap();
        assert_eq!(again, json!("No pending sub-agent tasks."));
    }

    #[tokio::test]
    async fn unknown_type_is_a_tool_error() {
        let err = task_tool(orchestrator())
            .execute(
                &ToolArguments::new(json!({"subagent_type": "wizard", "prompt": "x"})),
                &ToolExecutionContext::new("s", "/tmp"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown subagent_type"));
    }

    #[tokio::test]
    async fn cancel_of_unknown_task_reports_false() {
        let out = cancel_task_tool(orchestrator())
            .execute(
                &ToolArguments::new(json!({"task_id": "task_missing"})),
                &ToolExecutionContext::new("s", "/tmp"),
            )
            .await
            .unwrap();
        assert_eq!(out["cancelled"], false);
    }
}
