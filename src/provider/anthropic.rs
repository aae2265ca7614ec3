//! Anthropic Messages adapter.
//!
//! Tool calls and results are content blocks inside messages, so the mapping
//! to and from the canonical model is mostly one-to-one.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{ConductorError, ErrorCode, NormalizedError, Result};
use crate::types::*;

use super::format::object_or_empty;
use super::{ProtocolAdapter, RequestParams, StreamAdapter};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const API_VERSION: &str = "2023-06-01";

const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("sonnet", "claude-sonnet-4-5"),
    ("opus", "claude-opus-4-1"),
    ("haiku", "claude-haiku-4-5"),
];

#[derive(Debug, Clone, Default)]
pub struct AnthropicAdapter {
    aliases: HashMap<String, String>,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra aliases; these win over the built-in table.
    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases.extend(aliases);
        self
    }
}

impl ProtocolAdapter for AnthropicAdapter {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn resolve_model(&self, alias: &str) -> String {
        if let Some(model) = self.aliases.get(alias) {
            return model.clone();
        }
        BUILTIN_ALIASES
            .iter()
            .find(|(name, _)| *name == alias)
            .map(|(_, model)| model.to_string())
            .unwrap_or_else(|| alias.to_string())
    }

    fn to_provider_tools(&self, tools: &[ToolDefinition]) -> Value {
        Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect(),
        )
    }

    fn to_provider_messages(&self, messages: &[CanonicalMessage]) -> Value {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                Role::System => {} // hoisted into the top-level system field
                Role::User => {
                    // tool_result blocks must lead the user turn
                    let (results, rest): (Vec<&ContentBlock>, Vec<&ContentBlock>) = msg
                        .content
                        .iter()
                        .partition(|b| matches!(b, ContentBlock::ToolResult { .. }));
                    let content: Vec<Value> = results
                        .into_iter()
                        .chain(rest)
                        .filter_map(block_to_anthropic)
                        .collect();
                    if !content.is_empty() {
                        out.push(json!({"role": "user", "content": content}));
                    }
                }
                Role::Assistant => {
                    let content: Vec<Value> =
                        msg.content.iter().filter_map(block_to_anthropic).collect();
                    if !content.is_empty() {
                        out.push(json!({"role": "assistant", "content": content}));
                    }
                }
            }
        }
        Value::Array(out)
    }

    fn from_provider_messages(&self, messages: &Value) -> Result<Vec<CanonicalMessage>> {
        let items = messages
            .as_array()
            .ok_or_else(|| ConductorError::InvalidArgument("expected a message array".into()))?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let role = match item.get("role").and_then(Value::as_str) {
                Some("user") => Role::User,
                Some("assistant") => Role::Assistant,
                other => {
                    return Err(ConductorError::InvalidArgument(format!(
                        "unsupported Anthropic role: {other:?}"
                    )))
                }
            };
            let content = match item.get("content") {
                Some(Value::String(text)) => vec![ContentBlock::text(text.clone())],
                Some(Value::Array(blocks)) => blocks.iter().filter_map(block_from_anthropic).collect(),
                _ => Vec::new(),
            };
            out.push(CanonicalMessage::new(role, content));
        }
        Ok(out)
    }

    fn build_request(&self, params: &RequestParams) -> Value {
        let mut system_parts: Vec<String> = params.system_prompt.iter().cloned().collect();
        system_parts.extend(
            params
                .messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(CanonicalMessage::text),
        );

        let mut body = json!({
            "model": params.model,
            "max_tokens": params.max_tokens,
            "messages": self.to_provider_messages(&params.messages),
            "stream": params.stream,
        });
        let Some(obj) = body.as_object_mut() else {
            return body;
        };

        if !system_parts.is_empty() {
            obj.insert("system".into(), system_parts.join("\n\n").into());
        }
        if let Some(temp) = params.temperature {
            obj.insert("temperature".into(), temp.into());
        }
        if !params.tools.is_empty() {
            obj.insert("tools".into(), self.to_provider_tools(&params.tools));
            let choice = match &params.tool_choice {
                ToolChoice::Auto => None,
                ToolChoice::Any => Some(json!({"type": "any"})),
                ToolChoice::None => Some(json!({"type": "none"})),
                ToolChoice::Tool(name) => Some(json!({"type": "tool", "name": name})),
            };
            if let Some(choice) = choice {
                obj.insert("tool_choice".into(), choice);
            }
        }

        body
    }

    fn from_provider_response(&self, response: &Value) -> Result<CanonicalResponse> {
        if response.get("type").and_then(Value::as_str) == Some("error") {
            let error = response.get("error").cloned().unwrap_or(Value::Null);
            let (code, message) = classify_error_object(&error, ErrorCode::Unknown);
            return Err(NormalizedError::new(code, message).into());
        }

        let blocks = response
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| ConductorError::api(200, "Malformed Anthropic response: missing content"))?;

        let mut message = CanonicalMessage::new(
            Role::Assistant,
            blocks.iter().filter_map(block_from_anthropic).collect(),
        );
        if let Some(id) = response.get("id").and_then(Value::as_str) {
            message.id = id.to_string();
        }

        Ok(CanonicalResponse {
            message,
            stop_reason: map_stop_reason(response.get("stop_reason").and_then(Value::as_str)),
            usage: parse_usage(response.get("usage")),
        })
    }

    fn normalize_error(&self, error: &ConductorError) -> NormalizedError {
        let base = error.normalize();
        let ConductorError::Api {
            body: Some(body), ..
        } = error
        else {
            return base;
        };
        let Some(error_obj) = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("error").cloned())
        else {
            return base;
        };
        let (code, message) = classify_error_object(&error_obj, base.code);
        NormalizedError::new(code, message).with_retry_after(base.retry_after_ms)
    }

    fn stream_adapter(&self) -> Box<dyn StreamAdapter> {
        Box::new(AnthropicStreamAdapter::default())
    }
}

/// Map an Anthropic `{type, message}` error object onto the taxonomy.
fn classify_error_object(error: &Value, fallback: ErrorCode) -> (ErrorCode, String) {
    let kind = error.get("type").and_then(Value::as_str).unwrap_or("");
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown Anthropic error")
        .to_string();
    let lower = message.to_lowercase();

    let code = match kind {
        "overloaded_error" | "api_error" => ErrorCode::ServerError,
        "rate_limit_error" => ErrorCode::RateLimit,
        "authentication_error" | "permission_error" => ErrorCode::Auth,
        "request_too_large" => ErrorCode::ContextLength,
        "timeout_error" => ErrorCode::Timeout,
        "invalid_request_error" if lower.contains("prompt is too long") || lower.contains("context window") => {
            ErrorCode::ContextLength
        }
        "invalid_request_error" if lower.contains("tool_use") && lower.contains("tool_result") => {
            ErrorCode::ToolError
        }
        "invalid_request_error" => ErrorCode::InvalidRequest,
        _ => fallback,
    };
    (code, message)
}

fn block_to_anthropic(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } if text.is_empty() => None,
        ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
        ContentBlock::ToolUse { id, name, input } => Some(json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        })),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        })),
        ContentBlock::Image { media_type, data } => Some(json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        })),
    }
}

fn block_from_anthropic(block: &Value) -> Option<ContentBlock> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::text(
            block.get("text").and_then(Value::as_str).unwrap_or_default(),
        )),
        "tool_use" => {
            let id = block.get("id").and_then(Value::as_str)?;
            let name = block.get("name").and_then(Value::as_str)?;
            Some(ContentBlock::tool_use(id, name, object_or_empty(name, block.get("input"))))
        }
        "tool_result" => {
            let id = block.get("tool_use_id").and_then(Value::as_str)?;
            let content = match block.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(parts)) => parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(""),
                _ => String::new(),
            };
            let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
            Some(ContentBlock::tool_result(id, content, is_error))
        }
        "image" => {
            let source = block.get("source")?;
            Some(ContentBlock::Image {
                media_type: source.get("media_type").and_then(Value::as_str)?.to_string(),
                data: source.get("data").and_then(Value::as_str)?.to_string(),
            })
        }
        other => {
            warn!(block_type = other, "dropping unsupported Anthropic content block");
            None
        }
    }
}

fn map_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") => StopReason::EndTurn,
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        other => {
            warn!(adapter = "anthropic", stop_reason = ?other, "unrecognised stop reason; treating as end_turn");
            StopReason::EndTurn
        }
    }
}

fn parse_usage(usage: Option<&Value>) -> Usage {
    let field = |name: &str| {
        usage
            .and_then(|u| u.get(name))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    };
    Usage {
        input_tokens: field("input_tokens"),
        output_tokens: field("output_tokens"),
    }
}

#[derive(Debug, Clone)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
}

/// Reassembles an Anthropic SSE stream. Blocks are addressed by the
/// `index` field of each event.
#[derive(Debug, Default)]
pub struct AnthropicStreamAdapter {
    message_id: Option<String>,
    blocks: BTreeMap<u64, PartialBlock>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    ended: bool,
}

impl AnthropicStreamAdapter {
    fn tool_id(&self, index: u64) -> Option<String> {
        match self.blocks.get(&index) {
            Some(PartialBlock::ToolUse { id, .. }) => Some(id.clone()),
            _ => None,
        }
    }
}

impl StreamAdapter for AnthropicStreamAdapter {
    fn process_chunk(&mut self, chunk: &Value) -> Vec<CanonicalStreamEvent> {
        let mut events = Vec::new();
        let index = chunk.get("index").and_then(Value::as_u64).unwrap_or(0);

        match chunk.get("type").and_then(Value::as_str).unwrap_or("") {
            "message_start" => {
                let message = chunk.get("message");
                let id = message
                    .and_then(|m| m.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(new_message_id);
                let usage = parse_usage(message.and_then(|m| m.get("usage")));
                self.usage.input_tokens = usage.input_tokens;
                self.usage.output_tokens = usage.output_tokens;
                self.message_id = Some(id.clone());
                events.push(CanonicalStreamEvent::MessageStart { id });
            }
            "content_block_start" => {
                let block = chunk.get("content_block").cloned().unwrap_or(Value::Null);
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                        let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                        events.push(CanonicalStreamEvent::ToolUseStart {
                            id: id.clone(),
                            name: name.clone(),
                        });
                        self.blocks.insert(
                            index,
                            PartialBlock::ToolUse {
                                id,
                                name,
                                json: String::new(),
                            },
                        );
                    }
                    Some("text") => {
                        let text = block.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
                        if !text.is_empty() {
                            events.push(CanonicalStreamEvent::TextDelta { text: text.clone() });
                        }
                        self.blocks.insert(index, PartialBlock::Text(text));
                    }
                    other => {
                        tracing::debug!(block_type = ?other, "ignoring streamed block");
                    }
                }
            }
            "content_block_delta" => {
                let delta = chunk.get("delta").cloned().unwrap_or(Value::Null);
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        let text = delta.get("text").and_then(Value::as_str).unwrap_or_default();
                        if let Some(PartialBlock::Text(buf)) = self.blocks.get_mut(&index) {
                            buf.push_str(text);
                        } else {
                            self.blocks.insert(index, PartialBlock::Text(text.to_string()));
                        }
                        events.push(CanonicalStreamEvent::TextDelta {
                            text: text.to_string(),
                        });
                    }
                    Some("input_json_delta") => {
                        let partial = delta.get("partial_json").and_then(Value::as_str).unwrap_or_default();
                        if let Some(PartialBlock::ToolUse { id, json, .. }) = self.blocks.get_mut(&index) {
                            json.push_str(partial);
                            events.push(CanonicalStreamEvent::ToolUseInputDelta {
                                id: id.clone(),
                                partial_json: partial.to_string(),
                            });
                        } else {
                            warn!(index, "input delta for unknown tool block");
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                if let Some(id) = self.tool_id(index) {
                    events.push(CanonicalStreamEvent::ToolUseEnd { id });
                }
            }
            "message_delta" => {
                if let Some(reason) = chunk
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .filter(|r| !r.is_null())
                {
                    self.stop_reason = Some(map_stop_reason(reason.as_str()));
                }
                if let Some(out) = chunk
                    .get("usage")
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(Value::as_u64)
                {
                    self.usage.output_tokens = out as u32;
                }
            }
            "message_stop" => {
                self.ended = true;
                events.push(CanonicalStreamEvent::MessageEnd {
                    stop_reason: self.stop_reason(),
                    usage: self.usage,
                });
            }
            "error" => {
                let error = chunk.get("error").cloned().unwrap_or(Value::Null);
                let (code, message) = classify_error_object(&error, ErrorCode::ServerError);
                events.push(CanonicalStreamEvent::Error {
                    error: NormalizedError::new(code, message),
                });
            }
            _ => {} // ping
        }
        events
    }

    fn finish(&mut self) -> Vec<CanonicalStreamEvent> {
        if self.ended || self.message_id.is_none() {
            return Vec::new();
        }
        self.ended = true;
        vec![CanonicalStreamEvent::MessageEnd {
            stop_reason: self.stop_reason(),
            usage: self.usage,
        }]
    }

    fn get_final_message(&self) -> CanonicalMessage {
        let content = self
            .blocks
            .values()
            .filter_map(|block| match block {
                PartialBlock::Text(text) if text.is_empty() => None,
                PartialBlock::Text(text) => Some(ContentBlock::text(text.clone())),
                PartialBlock::ToolUse { id, name, json } => Some(ContentBlock::tool_use(
                    id.clone(),
                    name.clone(),
                    super::format::parse_arguments(name, json),
                )),
            })
            .collect();
        let mut message = CanonicalMessage::new(Role::Assistant, content);
        if let Some(id) = &self.message_id {
            message.id = id.clone();
        }
        message
    }

    fn stop_reason(&self) -> StopReason {
        match self.stop_reason {
            Some(reason) => reason,
            None if self
                .blocks
                .values()
                .any(|b| matches!(b, PartialBlock::ToolUse { .. })) =>
            {
                StopReason::ToolUse
            }
            None => StopReason::EndTurn,
        }
    }

    fn usage(&self) -> Usage {
        self.usage
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
