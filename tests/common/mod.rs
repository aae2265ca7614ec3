//! Shared test helpers and a scripted model transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};

use conductor::agent_loop::{AgentEvent, AgentEventPayload, AgentRunner};
use conductor::config::RuntimeSettings;
use conductor::error::{ConductorError, Result};
use conductor::permissions::PermissionGate;
use conductor::provider::anthropic::AnthropicAdapter;
use conductor::provider::openai::OpenAiAdapter;
use conductor::provider::{Backend, ModelTransport};
use conductor::tools::{Tool, ToolEngine, ToolRegistry};

/// One scripted reply.
pub enum Scripted {
    Response(Value),
    Stream(Vec<Value>),
    /// Yields the chunks, then never another one.
    Stall(Vec<Value>),
    /// Yields the chunks, then fails.
    Broken(Vec<Value>, ConductorError),
    Error(ConductorError),
}

/// Replays backend-native JSON in order and records every request body.
///
/// When the script runs dry it keeps answering with the last `Response`.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<Value>>,
    requests: Mutex<Vec<Value>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &Value) -> Option<Scripted> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Response(value)) => {
                *self.fallback.lock().unwrap() = Some(value.clone());
                Some(Scripted::Response(value))
            }
            Some(other) => Some(other),
            None => self.fallback.lock().unwrap().clone().map(Scripted::Response),
        }
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn send(&self, request: &Value) -> Result<Value> {
        match self.next(request) {
            Some(Scripted::Response(value)) => Ok(value),
            Some(Scripted::Error(err)) => Err(err),
            Some(Scripted::Stream(_) | Scripted::Stall(_) | Scripted::Broken(..)) => {
                panic!("stream scripted for a non-streaming request")
            }
            None => panic!("script exhausted"),
        }
    }

    async fn send_stream(&self, request: &Value) -> Result<BoxStream<'static, Result<Value>>> {
        match self.next(request) {
            Some(Scripted::Stream(chunks)) => {
                Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
            }
            Some(Scripted::Stall(chunks)) => Ok(Box::pin(
                futures::stream::iter(chunks.into_iter().map(Ok)).chain(futures::stream::pending()),
            )),
            Some(Scripted::Broken(chunks, err)) => {
                let mut items: Vec<Result<Value>> = chunks.into_iter().map(Ok).collect();
                items.push(Err(err));
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Some(Scripted::Error(err)) => Err(err),
            Some(Scripted::Response(_)) => panic!("response scripted for a streaming request"),
            None => panic!("script exhausted"),
        }
    }
}

type Route = dyn Fn(&Value) -> Value + Send + Sync;

/// Answers each request by inspecting it. For concurrent callers sharing one
/// backend, where a fixed script would race.
pub struct RoutedTransport {
    route: Box<Route>,
    requests: Mutex<Vec<Value>>,
}

impl RoutedTransport {
    pub fn new(route: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            route: Box::new(route),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelTransport for RoutedTransport {
    async fn send(&self, request: &Value) -> Result<Value> {
        self.requests.lock().unwrap().push(request.clone());
        Ok((self.route)(request))
    }

    async fn send_stream(&self, _request: &Value) -> Result<BoxStream<'static, Result<Value>>> {
        Err(ConductorError::Configuration("routed transport does not stream".into()))
    }
}

/// Whether an Anthropic-shaped request carries a result for `tool_use_id`.
pub fn has_tool_result(request: &Value, tool_use_id: &str) -> bool {
    request["messages"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|m| m["content"].as_array())
        .flatten()
        .any(|block| block["type"] == "tool_result" && block["tool_use_id"] == tool_use_id)
}

// ── Anthropic shapes ──────────────────────────────────────────────────

pub fn anthropic_text(text: &str) -> Value {
    json!({
        "id": "msg_text",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 10, "output_tokens": 5}
    })
}

pub fn anthropic_tool_calls(calls: &[(&str, &str, Value)]) -> Value {
    let content: Vec<Value> = calls
        .iter()
        .map(|(id, name, input)| json!({"type": "tool_use", "id": id, "name": name, "input": input}))
        .collect();
    json!({
        "id": "msg_tools",
        "type": "message",
        "role": "assistant",
        "content": content,
        "stop_reason": "tool_use",
        "usage": {"input_tokens": 10, "output_tokens": 5}
    })
}

/// SSE chunks for a streamed text reply.
pub fn anthropic_text_stream(parts: &[&str]) -> Vec<Value> {
    let mut chunks = vec![
        json!({"type": "message_start", "message": {"id": "msg_stream", "usage": {"input_tokens": 7, "output_tokens": 0}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
    ];
    for part in parts {
        chunks.push(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": part}}));
    }
    chunks.extend([
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 4}}),
        json!({"type": "message_stop"}),
    ]);
    chunks
}

/// SSE chunks for one streamed tool call, with the input split in two.
pub fn anthropic_tool_stream(id: &str, name: &str, input: &Value) -> Vec<Value> {
    let raw = input.to_string();
    let (head, tail) = raw.split_at(raw.len() / 2);
    vec![
        json!({"type": "message_start", "message": {"id": "msg_tool_stream", "usage": {"input_tokens": 7, "output_tokens": 0}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": head}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": tail}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 9}}),
        json!({"type": "message_stop"}),
    ]
}

// ── OpenAI shapes ─────────────────────────────────────────────────────

pub fn openai_text(text: &str) -> Value {
    json!({
        "id": "chatcmpl-text",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5}
    })
}

pub fn openai_tool_calls(calls: &[(&str, &str, Value)]) -> Value {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(id, name, input)| {
            json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": input.to_string()}
            })
        })
        .collect();
    json!({
        "id": "chatcmpl-tools",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": null, "tool_calls": tool_calls},
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5}
    })
}

// ── Wiring ────────────────────────────────────────────────────────────

/// Non-streaming defaults with fast retries.
pub fn settings() -> RuntimeSettings {
    let mut settings = RuntimeSettings::default();
    settings.agent.stream = false;
    settings.retry.initial_backoff_ms = 1;
    settings.retry.max_backoff_ms = 5;
    settings.subagents.poll_interval_ms = 10;
    settings
}

pub fn anthropic_backend(transport: Arc<ScriptedTransport>) -> Backend {
    Backend::new(Arc::new(AnthropicAdapter::new()), transport)
}

pub fn openai_backend(transport: Arc<ScriptedTransport>) -> Backend {
    Backend::new(Arc::new(OpenAiAdapter::new(false)), transport)
}

pub fn registry(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
    ToolRegistry::builder().tools(tools).build().unwrap()
}

pub fn runner(
    backend: Backend,
    tools: Vec<Arc<dyn Tool>>,
    gate: PermissionGate,
    settings: RuntimeSettings,
) -> AgentRunner {
    AgentRunner::new(backend, ToolEngine::new(registry(tools)), gate, Arc::new(settings))
}

/// Drain whatever has been emitted so far.
pub fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEventPayload> {
    let mut payloads = Vec::new();
    while let Ok(event) = rx.try_recv() {
        payloads.push(event.payload);
    }
    payloads
}
