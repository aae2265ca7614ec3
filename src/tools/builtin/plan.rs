//! `ProposePlan`: hand a plan to the human and end the turn.

use std::sync::Arc;

use serde_json::Value;

use crate::agent_loop::events::AgentEventPayload;
use crate::error::ConductorError;
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;
use crate::types::PermissionLevel;

pub const PLAN_SUBMITTED: &str = "Plan submitted for review. Stop here and wait for the user's decision.";

pub fn propose_plan_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "ProposePlan",
            "Present an implementation plan for approval. Ends the current turn.",
            AgentToolParameters::object()
                .string("plan", "The plan, in markdown", true)
                .build(),
            |args, ctx: ToolExecutionContext| async move {
                let plan = args.get_str("plan")?;
                if plan.trim().is_empty() {
                    return Err(ConductorError::InvalidArgument("plan must not be empty".into()));
                }
                ctx.events.emit(AgentEventPayload::PlanProposed {
                    plan: plan.to_string(),
                });
                Ok(Value::String(PLAN_SUBMITTED.into()))
            },
        )
        .with_permission_level(PermissionLevel::Auto)
        .ending_turn(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::events::EventEmitter;
    use crate::tools::arguments::ToolArguments;
    use serde_json::json;

    #[tokio::test]
    async fn emits_plan_and_ends_turn() {
        let (events, mut rx) = EventEmitter::channel("s");
        let mut ctx = ToolExecutionContext::new("s", "/tmp");
        ctx.events = events;

        let tool = propose_plan_tool();
        assert!(tool.ends_turn());
        let out = tool
            .execute(&ToolArguments::new(json!({"plan": "1. do it"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!(PLAN_SUBMITTED));
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.payload,
            AgentEventPayload::PlanProposed { plan: "1. do it".into() }
        );
    }
}
