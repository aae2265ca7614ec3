//! conductor CLI binary entry point.

use std::io::Write;

use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use conductor::agent_loop::{AgentEventPayload, TurnOptions};
use conductor::cli::Cli;
use conductor::config::ConductorConfig;
use conductor::runtime::{AgentRuntime, ToolSet};
use conductor::types::CanonicalMessage;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CONDUCTOR_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConductorConfig::from_env()?;
    let mut builder = AgentRuntime::builder(config).default_adapter(cli.adapter.clone());
    if let Some(dir) = &cli.working_dir {
        builder = builder.working_dir(dir.clone());
    }
    let runtime = builder.build()?;

    let options = TurnOptions::builder()
        .maybe_model(cli.model)
        .maybe_system_prompt(cli.system)
        .maybe_max_iterations(cli.max_iterations)
        .stream(!cli.no_stream)
        .plan_mode(cli.plan)
        .build();
    let mut handle = runtime.run_turn(
        vec![CanonicalMessage::user(cli.prompt)],
        &cli.adapter,
        ToolSet::All,
        options,
    )?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while let Some(event) = handle.events.next().await {
        match event.payload {
            AgentEventPayload::TextDelta { text } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            AgentEventPayload::ToolExecutionStart { call } => {
                eprintln!("\n> {} ({})", call.name, call.id);
            }
            AgentEventPayload::ToolExecutionEnd { tool_name, output, .. } => {
                let marker = if output.is_error { "error" } else { "ok" };
                let preview: String = output.content.chars().take(200).collect();
                eprintln!("  {tool_name} {marker}: {preview}");
            }
            AgentEventPayload::PermissionRequest { request } => {
                let approved = if cli.yes {
                    true
                } else {
                    eprint!("Allow {} {}? [y/N] ", request.tool_name, request.tool_input);
                    let answer = stdin.next_line().await?.unwrap_or_default();
                    matches!(answer.trim(), "y" | "Y" | "yes")
                };
                runtime.resolve_permission(&request.request_id, approved);
            }
            AgentEventPayload::Question { request_id, question } => {
                eprint!("\n{question}\n> ");
                let answer = stdin.next_line().await?.unwrap_or_default();
                runtime.answer_question(&request_id, answer.trim());
            }
            AgentEventPayload::PlanProposed { plan } => {
                eprintln!("\nProposed plan:\n{plan}");
            }
            AgentEventPayload::Retrying { attempt, delay_ms, error } => {
                eprintln!("\nretry {attempt} in {delay_ms}ms: {error}");
            }
            AgentEventPayload::TurnCompleted { .. } | AgentEventPayload::TurnFailed { .. } => break,
            _ => {}
        }
    }
    println!();

    let result = handle.result().await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result.transcript)?);
    }
    Ok(())
}
