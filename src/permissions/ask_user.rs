//! `AskUser`: route a model question to the human through the gate.

use std::sync::Arc;

use serde_json::Value;

use super::gate::PermissionGate;
use crate::error::ConductorError;
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;
use crate::types::PermissionLevel;

pub fn ask_user_tool(gate: PermissionGate) -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "AskUser",
            "Ask the user a question and wait for the answer. Use when a decision needs human input.",
            AgentToolParameters::object()
                .string("question", "The question to ask", true)
                .array("options", "Suggested answers", serde_json::json!({"type": "string"}), false)
                .build(),
            move |args, ctx: ToolExecutionContext| {
                let gate = gate.clone();
                async move {
                    let mut question = args.get_str("question")?.to_string();
                    let options: Vec<&str> = args
                        .get_array("options")
                        .map(|opts| opts.iter().filter_map(Value::as_str).collect())
                        .unwrap_or_default();
                    if !options.is_empty() {
                        question.push_str("\nOptions: ");
                        question.push_str(&options.join(", "));
                    }
                    let answer = gate
                        .ask_question(&question, &ctx.tool_call_id, &ctx.events, &ctx.cancel)
                        .await
                        .map_err(|reason| ConductorError::tool("AskUser", reason))?;
                    Ok(Value::String(answer))
                }
            },
        )
        .with_permission_level(PermissionLevel::Auto),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::events::{AgentEventPayload, EventEmitter};
    use crate::config::PermissionSettings;
    use crate::tools::arguments::ToolArguments;
    use serde_json::json;

    #[tokio::test]
    async fn answer_becomes_the_tool_result() {
        let gate = PermissionGate::new(PermissionSettings::default());
        let (events, mut rx) = EventEmitter::channel("s");
        let mut ctx = ToolExecutionContext::new("s", "/tmp").for_call("toolu_q", "AskUser");
        ctx.events = events;

        let tool = ask_user_tool(gate.clone());
        let task = tokio::spawn(async move {
            tool.execute(
                &ToolArguments::new(json!({"question": "Ship it?", "options": ["yes", "no"]})),
                &ctx,
            )
            .await
        });

        let event = rx.recv().await.unwrap();
        let AgentEventPayload::Question { request_id, question } = event.payload else {
            panic!("expected a question event");
        };
        assert_eq!(question, "Ship it?\nOptions: yes, no");
        assert!(gate.answer(&request_id, "yes"));
        assert_eq!(task.await.unwrap().unwrap(), json!("yes"));
    }
}
