//! OpenAI Chat Completions adapter.
//!
//! Tool calls travel as JSON strings on the assistant message and results as
//! separate `tool` role messages without an error flag. Both quirks are
//! absorbed here so the canonical model never sees them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::{ConductorError, ErrorCode, NormalizedError, Result};
use crate::types::*;

use super::format::{decode_flagged_result, encode_flagged_result, parse_arguments};
use super::schema::{normalize_schema_for_provider, strip_null_optionals, to_strict_schema};
use super::{ProtocolAdapter, RequestParams, StreamAdapter};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_MODEL: &str = "gpt-4.1";

const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("default", "gpt-4.1"),
    ("fast", "gpt-4.1-mini"),
    ("mini", "gpt-4.1-mini"),
    ("reasoning", "o4-mini"),
    ("gpt5", "gpt-5"),
];

/// Original (non-strict) schemas by tool name, used to strip the nulls a
/// strict backend sends for omitted optional fields.
type SchemaTable = Arc<RwLock<HashMap<String, Value>>>;

#[derive(Debug, Clone, Default)]
pub struct OpenAiAdapter {
    strict_tools: bool,
    aliases: HashMap<String, String>,
    schemas: SchemaTable,
}

impl OpenAiAdapter {
    pub fn new(strict_tools: bool) -> Self {
        Self {
            strict_tools,
            ..Default::default()
        }
    }

    /// Extra aliases; these win over the built-in table.
    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases.extend(aliases);
        self
    }

    pub fn strict_tools(&self) -> bool {
        self.strict_tools
    }

    fn parse_call(&self, name: &str, raw_arguments: &str) -> Map<String, Value> {
        parse_call_arguments(&self.schemas, self.strict_tools, name, raw_arguments)
    }
}

fn parse_call_arguments(
    schemas: &SchemaTable,
    strict: bool,
    name: &str,
    raw_arguments: &str,
) -> Map<String, Value> {
    let mut args = parse_arguments(name, raw_arguments);
    if strict {
        if let Some(schema) = schemas.read().ok().and_then(|s| s.get(name).cloned()) {
            strip_null_optionals(&mut args, &schema);
        }
    }
    args
}

impl ProtocolAdapter for OpenAiAdapter {
    fn id(&self) -> &str {
        "openai"
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
        if self.strict_tools {
            if let Ok(mut table) = self.schemas.write() {
                for tool in tools {
                    table.insert(tool.name.clone(), tool.input_schema.clone());
                }
            }
        }

        Value::Array(
            tools
                .iter()
                .map(|t| {
                    let mut function = json!({
                        "name": t.name,
                        "description": t.description,
                    });
                    if self.strict_tools {
                        function["parameters"] = to_strict_schema(&t.input_schema);
                        function["strict"] = Value::Bool(true);
                    } else {
                        function["parameters"] = normalize_schema_for_provider(&t.input_schema, "openai");
                    }
                    json!({"type": "function", "function": function})
                })
                .collect(),
        )
    }

    fn to_provider_messages(&self, messages: &[CanonicalMessage]) -> Value {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                Role::System => out.push(json!({"role": "system", "content": msg.text()})),
                Role::Assistant => out.push(assistant_to_openai(msg)),
                Role::User => {
                    // tool results become their own messages, ahead of any
                    // remaining user content
                    for block in &msg.content {
                        if let ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } = block
                        {
                            out.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_use_id,
                                "content": encode_flagged_result(content, *is_error),
                            }));
                        }
                    }
                    if let Some(user) = user_content_to_openai(msg) {
                        out.push(user);
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

        let mut out: Vec<CanonicalMessage> = Vec::with_capacity(items.len());
        for item in items {
            match item.get("role").and_then(Value::as_str) {
                Some("system") | Some("developer") => {
                    out.push(CanonicalMessage::system(content_text(item.get("content"))));
                }
                Some("user") => {
                    let content = match item.get("content") {
                        Some(Value::Array(parts)) => parts.iter().filter_map(part_from_openai).collect(),
                        other => vec![ContentBlock::text(content_text(other))],
                    };
                    out.push(CanonicalMessage::new(Role::User, content));
                }
                Some("assistant") => {
                    let mut content = Vec::new();
                    let text = content_text(item.get("content"));
                    if !text.is_empty() {
                        content.push(ContentBlock::text(text));
                    }
                    for call in item
                        .get("tool_calls")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                    {
                        let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                        let function = call.get("function");
                        let name = function
                            .and_then(|f| f.get("name"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let raw = function
                            .and_then(|f| f.get("arguments"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        content.push(ContentBlock::tool_use(id, name, self.parse_call(name, raw)));
                    }
                    out.push(CanonicalMessage::new(Role::Assistant, content));
                }
                Some("tool") => {
                    let id = item.get("tool_call_id").and_then(Value::as_str).unwrap_or_default();
                    let (content, is_error) = decode_flagged_result(&content_text(item.get("content")));
                    let block = ContentBlock::tool_result(id, content, is_error);
                    // consecutive tool messages share one canonical user turn
                    match out.last_mut() {
                        Some(prev) if prev.is_tool_result_only() => prev.content.push(block),
                        _ => out.push(CanonicalMessage::tool_results(vec![block])),
                    }
                }
                other => {
                    return Err(ConductorError::InvalidArgument(format!(
                        "unsupported OpenAI role: {other:?}"
                    )))
                }
            }
        }
        Ok(out)
    }

    fn build_request(&self, params: &RequestParams) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &params.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        if let Value::Array(rest) = self.to_provider_messages(&params.messages) {
            messages.extend(rest);
        }

        let mut body = json!({
            "model": params.model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "stream": params.stream,
        });
        let Some(obj) = body.as_object_mut() else {
            return body;
        };

        if params.stream {
            obj.insert("stream_options".into(), json!({"include_usage": true}));
        }
        if let Some(temp) = params.temperature {
            obj.insert("temperature".into(), temp.into());
        }
        if !params.tools.is_empty() {
            obj.insert("tools".into(), self.to_provider_tools(&params.tools));
            let choice = match &params.tool_choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::Any => json!("required"),
                ToolChoice::None => json!("none"),
                ToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
            };
            obj.insert("tool_choice".into(), choice);
        }

        body
    }

    fn from_provider_response(&self, response: &Value) -> Result<CanonicalResponse> {
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let (code, message, retryable) = classify_error_object(error, ErrorCode::Unknown);
            let mut normalized = NormalizedError::new(code, message);
            normalized.retryable = retryable;
            return Err(normalized.into());
        }

        let choice = response
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| ConductorError::api(200, "No choices in OpenAI response"))?;
        let message = choice.get("message").cloned().unwrap_or(Value::Null);

        let mut content = Vec::new();
        let text = content_text(message.get("content"));
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }
        for call in message
            .get("tool_calls")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
            let function = call.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let raw = function
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            content.push(ContentBlock::tool_use(id, name, self.parse_call(name, raw)));
        }

        let mut canonical = CanonicalMessage::new(Role::Assistant, content);
        if let Some(id) = response.get("id").and_then(Value::as_str) {
            canonical.id = id.to_string();
        }

        Ok(CanonicalResponse {
            message: canonical,
            stop_reason: map_finish_reason(choice.get("finish_reason").and_then(Value::as_str)),
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
        let (code, message, retryable) = classify_error_object(&error_obj, base.code);
        let mut normalized = NormalizedError::new(code, message).with_retry_after(base.retry_after_ms);
        normalized.retryable = retryable;
        normalized
    }

    fn stream_adapter(&self) -> Box<dyn StreamAdapter> {
        Box::new(OpenAiStreamAdapter::new(self.schemas.clone(), self.strict_tools))
    }
}

/// Map an OpenAI `{message, type, code}` error object onto the taxonomy.
/// Returns the code, message and whether a retry makes sense.
fn classify_error_object(error: &Value, fallback: ErrorCode) -> (ErrorCode, String, bool) {
    let kind = error.get("type").and_then(Value::as_str).unwrap_or("");
    let code = error.get("code").and_then(Value::as_str).unwrap_or("");
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown OpenAI error")
        .to_string();

    let mapped = match (code, kind) {
        ("context_length_exceeded", _) => ErrorCode::ContextLength,
        // quota exhaustion will not clear by waiting
        ("insufficient_quota", _) => return (ErrorCode::RateLimit, message, false),
        ("rate_limit_exceeded", _) | (_, "rate_limit_error") => ErrorCode::RateLimit,
        ("invalid_api_key", _) | (_, "authentication_error") => ErrorCode::Auth,
        (_, "server_error") => ErrorCode::ServerError,
        (_, "invalid_request_error") if message.contains("tool_call_id") => ErrorCode::ToolError,
        (_, "invalid_request_error") => ErrorCode::InvalidRequest,
        _ => fallback,
    };
    (mapped, message, mapped.is_retryable())
}

fn assistant_to_openai(msg: &CanonicalMessage) -> Value {
    let text = msg.text();
    let calls = msg.tool_calls();
    let mut out = json!({
        "role": "assistant",
        "content": if text.is_empty() { Value::Null } else { Value::String(text) },
    });
    if !calls.is_empty() {
        out["tool_calls"] = Value::Array(
            calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.input_value().to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    out
}

fn user_content_to_openai(msg: &CanonicalMessage) -> Option<Value> {
    let rest: Vec<&ContentBlock> = msg
        .content
        .iter()
        .filter(|b| !matches!(b, ContentBlock::ToolResult { .. }))
        .collect();
    match rest.as_slice() {
        [] => None,
        [ContentBlock::Text { text }] => Some(json!({"role": "user", "content": text})),
        blocks => {
            let parts: Vec<Value> = blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
                    ContentBlock::Image { media_type, data } => Some(json!({
                        "type": "image_url",
                        "image_url": { "url": format!("data:{media_type};base64,{data}") }
                    })),
                    _ => None,
                })
                .collect();
            Some(json!({"role": "user", "content": parts}))
        }
    }
}

fn part_from_openai(part: &Value) -> Option<ContentBlock> {
    match part.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::text(
            part.get("text").and_then(Value::as_str).unwrap_or_default(),
        )),
        "image_url" => {
            let url = part.get("image_url")?.get("url")?.as_str()?;
            let rest = url.strip_prefix("data:")?;
            let (media_type, data) = rest.split_once(";base64,")?;
            Some(ContentBlock::Image {
                media_type: media_type.to_string(),
                data: data.to_string(),
            })
        }
        _ => None,
    }
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn map_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("stop") => StopReason::EndTurn,
        Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some("content_filter") => StopReason::Error,
        other => {
            warn!(adapter = "openai", stop_reason = ?other, "unrecognised finish reason; treating as end_turn");
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
        input_tokens: field("prompt_tokens"),
        output_tokens: field("completion_tokens"),
    }
}

#[derive(Debug, Clone)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
    ended: bool,
}

/// Reassembles a Chat Completions stream.
///
/// Call ids arrive only on the first fragment of each call; later fragments
/// carry just a positional `index`. `calls` is that index→call map for the
/// current response and is cleared on [`StreamAdapter::reset`].
#[derive(Debug)]
pub struct OpenAiStreamAdapter {
    schemas: SchemaTable,
    strict: bool,
    message_id: Option<String>,
    text: String,
    calls: BTreeMap<u64, PendingCall>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    ended: bool,
}

impl OpenAiStreamAdapter {
    fn new(schemas: SchemaTable, strict: bool) -> Self {
        Self {
            schemas,
            strict,
            message_id: None,
            text: String::new(),
            calls: BTreeMap::new(),
            stop_reason: None,
            usage: Usage::default(),
            ended: false,
        }
    }

    fn end_open_calls(&mut self, events: &mut Vec<CanonicalStreamEvent>) {
        for call in self.calls.values_mut() {
            if !call.ended {
                call.ended = true;
                events.push(CanonicalStreamEvent::ToolUseEnd { id: call.id.clone() });
            }
        }
    }

    fn message_end(&mut self) -> CanonicalStreamEvent {
        self.ended = true;
        CanonicalStreamEvent::MessageEnd {
            stop_reason: self.stop_reason(),
            usage: self.usage,
        }
    }
}

impl Default for OpenAiStreamAdapter {
    fn default() -> Self {
        Self::new(SchemaTable::default(), false)
    }
}

impl StreamAdapter for OpenAiStreamAdapter {
    fn process_chunk(&mut self, chunk: &Value) -> Vec<CanonicalStreamEvent> {
        let mut events = Vec::new();

        if let Some(error) = chunk.get("error").filter(|e| !e.is_null()) {
            let (code, message, retryable) = classify_error_object(error, ErrorCode::ServerError);
            let mut normalized = NormalizedError::new(code, message);
            normalized.retryable = retryable;
            events.push(CanonicalStreamEvent::Error { error: normalized });
            return events;
        }

        if self.message_id.is_none() {
            let id = chunk
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(new_message_id);
            self.message_id = Some(id.clone());
            events.push(CanonicalStreamEvent::MessageStart { id });
        }

        if let Some(choice) = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        {
            let delta = choice.get("delta").cloned().unwrap_or(Value::Null);

            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    self.text.push_str(text);
                    events.push(CanonicalStreamEvent::TextDelta {
                        text: text.to_string(),
                    });
                }
            }

            for fragment in delta
                .get("tool_calls")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let index = fragment.get("index").and_then(Value::as_u64).unwrap_or(0);
                let function = fragment.get("function");

                if !self.calls.contains_key(&index) {
                    let Some(id) = fragment.get("id").and_then(Value::as_str) else {
                        warn!(index, "tool call fragment for unknown index without id");
                        continue;
                    };
                    let name = function
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    events.push(CanonicalStreamEvent::ToolUseStart {
                        id: id.to_string(),
                        name: name.clone(),
                    });
                    self.calls.insert(
                        index,
                        PendingCall {
                            id: id.to_string(),
                            name,
                            arguments: String::new(),
                            ended: false,
                        },
                    );
                }

                let partial = function
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !partial.is_empty() {
                    if let Some(call) = self.calls.get_mut(&index) {
                        call.arguments.push_str(partial);
                        events.push(CanonicalStreamEvent::ToolUseInputDelta {
                            id: call.id.clone(),
                            partial_json: partial.to_string(),
                        });
                    }
                }
            }

            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                self.stop_reason = Some(map_finish_reason(Some(reason)));
                self.end_open_calls(&mut events);
            }
        }

        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.usage = parse_usage(Some(usage));
            if self.stop_reason.is_some() && !self.ended {
                events.push(self.message_end());
            }
        }

        events
    }

    fn finish(&mut self) -> Vec<CanonicalStreamEvent> {
        if self.ended || self.message_id.is_none() {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.end_open_calls(&mut events);
        events.push(self.message_end());
        events
    }

    fn get_final_message(&self) -> CanonicalMessage {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::text(self.text.clone()));
        }
        for call in self.calls.values() {
            content.push(ContentBlock::tool_use(
                call.id.clone(),
                call.name.clone(),
                parse_call_arguments(&self.schemas, self.strict, &call.name, &call.arguments),
            ));
        }
        let mut message = CanonicalMessage::new(Role::Assistant, content);
        if let Some(id) = &self.message_id {
            message.id = id.clone();
        }
        message
    }

    fn stop_reason(&self) -> StopReason {
        match self.stop_reason {
            Some(reason) => reason,
            None if !self.calls.is_empty() => StopReason::ToolUse,
            None => StopReason::EndTurn,
        }
    }

    fn usage(&self) -> Usage {
        self.usage
    }

    fn reset(&mut self) {
        self.message_id = None;
        self.text.clear();
        self.calls.clear();
        self.stop_reason = None;
        self.usage = Usage::default();
        self.ended = false;
    }
}
