//! `Bash`: shell commands in the working directory.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::truncate_utf8;
use crate::error::ConductorError;
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;
use crate::types::PermissionLevel;

/// Create the `Bash` tool; executes via `sh -c`.
///
/// Captures stdout and stderr, applies the configured timeout (a per-call
/// `timeout` may only shorten it) and truncates oversized output.
pub fn bash_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "Bash",
            "Execute a shell command in the working directory and return its combined output",
            AgentToolParameters::object()
                .string("command", "The shell command to execute", true)
                .integer("timeout", "Timeout in seconds", false)
                .build(),
            |args, ctx: ToolExecutionContext| async move {
                let command = args.get_str("command")?;
                let limit = ctx.settings.bash_timeout_secs;
                let timeout = Duration::from_secs(
                    args.get_u64_opt("timeout").map_or(limit, |t| t.clamp(1, limit.max(1))),
                );

                let result = tokio::time::timeout(
                    timeout,
                    tokio::process::Command::new("sh")
                        .arg("-c")
                        .arg(command)
                        .current_dir(&ctx.working_dir)
                        .kill_on_drop(true)
                        .output(),
                )
                .await;

                let output = match result {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => return Err(ConductorError::tool("Bash", e.to_string())),
                    Err(_) => {
                        return Err(ConductorError::tool(
                            "Bash",
                            format!("command timed out after {}s", timeout.as_secs()),
                        ));
                    }
                };

                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let mut combined = format!("{stdout}{stderr}");
                let max = ctx.settings.output_max_bytes;
                let truncated = combined.len() > max;
                if truncated {
                    combined = truncate_utf8(&combined, max);
                    combined.push_str("\n... (truncated)");
                }

                Ok(json!({
                    "exit_code": output.status.code(),
                    "output": combined,
                    "truncated": truncated,
                }))
            },
        )
        .with_permission_level(PermissionLevel::Ask),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::arguments::ToolArguments;

    fn ctx(dir: &std::path::Path) -> ToolExecutionContext {
        ToolExecutionContext::new("s", dir)
    }

    fn args(value: serde_json::Value) -> ToolArguments {
        ToolArguments::new(value)
    }

    #[tokio::test]
    async fn runs_in_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let result = bash_tool()
            .execute(&args(json!({"command": "ls"})), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(result["exit_code"], 0);
        assert!(result["output"].as_str().unwrap().contains("marker.txt"));
    }

    #[tokio::test]
    async fn captures_stderr_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let result = bash_tool()
            .execute(&args(json!({"command": "echo err >&2; exit 42"})), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(result["exit_code"], 42);
        assert!(result["output"].as_str().unwrap().contains("err"));
    }

    #[tokio::test]
    async fn truncates_large_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = ctx(dir.path());
        context.settings.output_max_bytes = 16;
        let result = bash_tool()
            .execute(&args(json!({"command": "printf 'x%.0s' $(seq 1 100)"})), &context)
            .await
            .unwrap();
        assert_eq!(result["truncated"], true);
        assert!(result["output"].as_str().unwrap().ends_with("... (truncated)"));
    }

    #[tokio::test]
    async fn times_out_long_commands() {
        let dir = tempfile::tempdir().unwrap();
        let err = bash_tool()
            .execute(&args(json!({"command": "sleep 10", "timeout": 1})), &ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn missing_command_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(bash_tool().execute(&args(json!({})), &ctx(dir.path())).await.is_err());
    }
}
