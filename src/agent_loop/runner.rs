//! The turn loop: model call, tool dispatch, repeat.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RuntimeSettings;
use crate::error::{ErrorCode, NormalizedError};
use crate::permissions::{GateDecision, PermissionGate};
use crate::provider::sanitize::{sanitize_tool_result_pairing, unpaired_tool_uses};
use crate::provider::{Backend, RequestParams};
use crate::tools::{ToolEngine, ToolExecutionContext, PLAN_MODE_TOOLS};
use crate::types::{
    CanonicalMessage, CanonicalResponse, CanonicalStreamEvent, ContentBlock, StopReason, ToolCall,
    ToolDefinition, ToolOutput, Usage,
};

use super::compaction::{compact, maybe_compact, Compaction};
use super::events::{AgentEventPayload, EventEmitter};
use super::types::{FailureKind, TurnFailure, TurnOptions, TurnOutcome, TurnResult};

/// Result content for tool calls cut short by cancellation.
pub const CANCELLED_RESULT: &str = "Tool call cancelled";

enum CallError {
    Cancelled,
    Failed(NormalizedError),
}

struct TurnState {
    messages: Vec<CanonicalMessage>,
    usage: Usage,
    iterations: usize,
    stop_reason: StopReason,
}

/// Drives one conversation turn against a backend.
#[derive(Clone)]
pub struct AgentRunner {
    backend: Backend,
    engine: ToolEngine,
    gate: PermissionGate,
    settings: Arc<RuntimeSettings>,
}

impl AgentRunner {
    pub fn new(
        backend: Backend,
        engine: ToolEngine,
        gate: PermissionGate,
        settings: Arc<RuntimeSettings>,
    ) -> Self {
        Self {
            backend,
            engine,
            gate,
            settings,
        }
    }

    pub fn engine(&self) -> &ToolEngine {
        &self.engine
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Run until the model stops calling tools, a plan is proposed, the turn
    /// is cancelled, or it fails.
    pub async fn run(
        &self,
        transcript: Vec<CanonicalMessage>,
        options: TurnOptions,
        events: EventEmitter,
        cancel: CancellationToken,
    ) -> Result<TurnResult, TurnFailure> {
        let span = info_span!(
            "turn",
            session_id = %events.session_id(),
            adapter = %self.backend.adapter.id(),
        );
        self.run_inner(transcript, options, events, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        transcript: Vec<CanonicalMessage>,
        options: TurnOptions,
        events: EventEmitter,
        cancel: CancellationToken,
    ) -> Result<TurnResult, TurnFailure> {
        let agent = &self.settings.agent;
        let limit = options
            .max_iterations
            .map_or(agent.max_iterations, |n| n.min(agent.max_iterations))
            .max(1);
        let requested = options
            .model
            .as_deref()
            .or(agent.model.as_deref())
            .unwrap_or_else(|| self.backend.adapter.default_model());
        let model = self.backend.adapter.resolve_model(requested);
        let tools = self.tool_definitions(options.plan_mode);
        let ctx = self.tool_context(&options, &events, &cancel);

        let mut state = TurnState {
            messages: transcript,
            usage: Usage::default(),
            iterations: 0,
            stop_reason: StopReason::EndTurn,
        };
        if !unpaired_tool_uses(&state.messages).is_empty() {
            warn!("incoming transcript has unpaired tool calls, repairing");
            state.messages = sanitize_tool_result_pairing(&state.messages);
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(self.finish(state, TurnOutcome::Cancelled, &events));
            }
            if state.iterations >= limit {
                warn!(limit, "iteration ceiling reached");
                return Err(self.fail(FailureKind::TooManyIterations { limit }, state, &events));
            }
            state.iterations += 1;
            let iteration = state.iterations;
            debug!(iteration, model = %model, "starting iteration");
            events.emit(AgentEventPayload::IterationStarted { iteration });

            if let Some(compaction) = maybe_compact(&state.messages, self.settings.compaction) {
                self.apply_compaction(&mut state, compaction, &events);
            }

            let response = match self
                .call_with_retry(&mut state, &options, &model, &tools, &events, &cancel)
                .await
            {
                Ok(response) => response,
                Err(CallError::Cancelled) => {
                    return Ok(self.finish(state, TurnOutcome::Cancelled, &events));
                }
                Err(CallError::Failed(error)) => {
                    events.emit(AgentEventPayload::Error {
                        error: error.clone(),
                    });
                    return Err(self.fail(FailureKind::Backend { error }, state, &events));
                }
            };

            state.usage.merge(&response.usage);
            state.stop_reason = response.stop_reason;
            let calls = response.message.tool_calls();
            state.messages.push(response.message);

            if calls.is_empty() {
                return Ok(self.finish(state, TurnOutcome::Completed, &events));
            }

            info!(iteration, count = calls.len(), "dispatching tool calls");
            let outputs = join_all(calls.iter().map(|call| self.dispatch(call, &ctx))).await;

            let ends_turn = calls
                .iter()
                .zip(&outputs)
                .any(|(call, output)| !output.is_error && self.engine.registry().ends_turn(&call.name));
            let results = calls
                .iter()
                .zip(outputs)
                .map(|(call, output)| {
                    ContentBlock::tool_result(call.id.clone(), output.content, output.is_error)
                })
                .collect();
            state.messages.push(CanonicalMessage::tool_results(results));

            if cancel.is_cancelled() {
                return Ok(self.finish(state, TurnOutcome::Cancelled, &events));
            }
            if ends_turn {
                return Ok(self.finish(state, TurnOutcome::PlanProposed, &events));
            }
        }
    }

    fn tool_definitions(&self, plan_mode: bool) -> Vec<ToolDefinition> {
        self.engine
            .registry()
            .definitions()
            .into_iter()
            .filter(|def| !plan_mode || PLAN_MODE_TOOLS.contains(&def.name.as_str()))
            .collect()
    }

    fn tool_context(
        &self,
        options: &TurnOptions,
        events: &EventEmitter,
        cancel: &CancellationToken,
    ) -> ToolExecutionContext {
        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(|| events.session_id().to_string());
        let working_dir = options
            .working_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let mut ctx = ToolExecutionContext::new(session_id, working_dir);
        ctx.plan_mode = options.plan_mode;
        ctx.cancel = cancel.clone();
        ctx.settings = self.settings.tools;
        ctx.events = events.clone();
        ctx
    }

    fn request_params(
        &self,
        options: &TurnOptions,
        model: &str,
        messages: &[CanonicalMessage],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> RequestParams {
        let agent = &self.settings.agent;
        RequestParams::builder()
            .model(model)
            .maybe_system_prompt(options.system_prompt.clone())
            .messages(messages.to_vec())
            .tools(tools.to_vec())
            .tool_choice(options.tool_choice.clone())
            .max_tokens(options.max_tokens.unwrap_or(agent.max_tokens))
            .maybe_temperature(options.temperature.or(agent.temperature))
            .stream(stream)
            .build()
    }

    async fn call_with_retry(
        &self,
        state: &mut TurnState,
        options: &TurnOptions,
        model: &str,
        tools: &[ToolDefinition],
        events: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<CanonicalResponse, CallError> {
        let policy = self.settings.retry.policy();
        let stream = options.stream.unwrap_or(self.settings.agent.stream);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let params = self.request_params(options, model, &state.messages, tools, stream);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CallError::Cancelled),
                outcome = self.call_model(&params, events) => outcome,
            };
            let error = match outcome {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            if !policy.should_retry(attempt, &error) {
                warn!(attempt, code = %error.code, error = %error.message, "model call failed");
                return Err(CallError::Failed(error));
            }
            match error.code {
                ErrorCode::ContextLength => {
                    let Some(compaction) =
                        compact(&state.messages, self.settings.compaction.keep_recent)
                    else {
                        warn!("context too long and nothing left to compact");
                        return Err(CallError::Failed(error));
                    };
                    self.apply_compaction(state, compaction, events);
                }
                ErrorCode::ToolError => {
                    state.messages = sanitize_tool_result_pairing(&state.messages);
                }
                _ => {}
            }

            let delay = policy.delay_for(attempt, &error);
            warn!(
                attempt,
                code = %error.code,
                delay_ms = delay.as_millis() as u64,
                "retrying model call"
            );
            events.emit(AgentEventPayload::Retrying {
                attempt,
                delay_ms: delay.as_millis() as u64,
                error,
            });
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CallError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn call_model(
        &self,
        params: &RequestParams,
        events: &EventEmitter,
    ) -> Result<CanonicalResponse, NormalizedError> {
        let adapter = &self.backend.adapter;
        let request = adapter.build_request(params);

        if !params.stream {
            let raw = self
                .backend
                .transport
                .send(&request)
                .await
                .map_err(|e| adapter.normalize_error(&e))?;
            return adapter
                .from_provider_response(&raw)
                .map_err(|e| adapter.normalize_error(&e));
        }

        let idle = Duration::from_secs(self.settings.agent.stream_idle_timeout_secs.max(1));
        let mut chunks = timeout(idle, self.backend.transport.send_stream(&request))
            .await
            .map_err(|_| stream_stalled(idle))?
            .map_err(|e| adapter.normalize_error(&e))?;
        let mut parser = adapter.stream_adapter();
        while let Some(chunk) = timeout(idle, chunks.next())
            .await
            .map_err(|_| stream_stalled(idle))?
        {
            let chunk = chunk.map_err(|e| adapter.normalize_error(&e))?;
            forward(parser.process_chunk(&chunk), events)?;
        }
        forward(parser.finish(), events)?;

        Ok(CanonicalResponse {
            message: parser.get_final_message(),
            stop_reason: parser.stop_reason(),
            usage: parser.usage(),
        })
    }

    /// Gate then execute one call. Every path yields a result.
    async fn dispatch(&self, call: &ToolCall, ctx: &ToolExecutionContext) -> ToolOutput {
        let ctx = ctx.for_call(&call.id, &call.name);
        ctx.events.emit(AgentEventPayload::ToolExecutionStart { call: call.clone() });

        let registry = self.engine.registry();
        let gated = registry
            .permission_level(&call.name)
            .filter(|_| !ctx.plan_mode || PLAN_MODE_TOOLS.contains(&call.name.as_str()));

        let output = if ctx.cancel.is_cancelled() {
            ToolOutput::error(CANCELLED_RESULT)
        } else {
            match gated {
                // unknown or filtered by plan mode; the engine reports why
                None => self.engine.execute(&call.name, &call.input, &ctx).await,
                Some(level) => match self.gate.authorize(call, level, &ctx.events, &ctx.cancel).await {
                    GateDecision::Allowed => self.engine.execute(&call.name, &call.input, &ctx).await,
                    GateDecision::Rejected(reason) => ToolOutput::error(reason),
                    GateDecision::Cancelled => ToolOutput::error(CANCELLED_RESULT),
                },
            }
        };

        debug!(tool = %call.name, is_error = output.is_error, "tool call finished");
        ctx.events.emit(AgentEventPayload::ToolExecutionEnd {
            tool_use_id: call.id.clone(),
            tool_name: call.name.clone(),
            output: output.clone(),
        });
        output
    }

    fn apply_compaction(&self, state: &mut TurnState, compaction: Compaction, events: &EventEmitter) {
        info!(removed = compaction.removed, kept = compaction.transcript.len(), "compacted transcript");
        events.emit(AgentEventPayload::Compacted {
            removed: compaction.removed,
            kept: compaction.transcript.len(),
        });
        state.messages = compaction.transcript;
    }

    fn finish(&self, state: TurnState, outcome: TurnOutcome, events: &EventEmitter) -> TurnResult {
        info!(?outcome, iterations = state.iterations, "turn finished");
        events.emit(AgentEventPayload::TurnCompleted {
            outcome,
            iterations: state.iterations,
            usage: state.usage,
        });
        TurnResult {
            transcript: state.messages,
            outcome,
            iterations: state.iterations,
            usage: state.usage,
            stop_reason: state.stop_reason,
        }
    }

    fn fail(&self, kind: FailureKind, state: TurnState, events: &EventEmitter) -> TurnFailure {
        events.emit(AgentEventPayload::TurnFailed {
            error: kind.to_string(),
        });
        TurnFailure {
            kind,
            transcript: state.messages,
            usage: state.usage,
        }
    }
}

impl std::fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRunner")
            .field("backend", &self.backend)
            .field("tools", &self.engine.registry().names())
            .finish()
    }
}

fn stream_stalled(idle: Duration) -> NormalizedError {
    warn!(idle_secs = idle.as_secs(), "model stream stalled");
    NormalizedError::new(
        ErrorCode::Timeout,
        format!("no data from the model stream for {}s", idle.as_secs()),
    )
}

/// Emit parsed stream events; an in-band error aborts the response.
fn forward(parsed: Vec<CanonicalStreamEvent>, events: &EventEmitter) -> Result<(), NormalizedError> {
    for event in parsed {
        if let CanonicalStreamEvent::Error { error } = event {
            return Err(error);
        }
        events.emit(event.into());
    }
    Ok(())
}
