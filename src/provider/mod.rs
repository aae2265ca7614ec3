//! Protocol adapters and model transports.
//!
//! An adapter converts between the canonical model and one backend's wire
//! shapes. A transport moves those shapes over the network. The loop only
//! ever talks to the pair through [`Backend`].

pub mod format;
pub mod http;
pub mod sanitize;
pub mod schema;

#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(feature = "openai")]
pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bon::Builder;
use futures::stream::BoxStream;
use serde_json::Value;
use strum::{Display, EnumString};

use crate::config::ConductorConfig;
use crate::error::{ConductorError, NormalizedError, Result};
use crate::types::{
    CanonicalMessage, CanonicalResponse, CanonicalStreamEvent, StopReason, ToolChoice,
    ToolDefinition, Usage,
};

/// Everything an adapter needs to build one backend request.
#[derive(Debug, Clone, Builder)]
pub struct RequestParams {
    /// Concrete model id (already alias-resolved).
    #[builder(into)]
    pub model: String,
    #[builder(into)]
    pub system_prompt: Option<String>,
    #[builder(default)]
    pub messages: Vec<CanonicalMessage>,
    #[builder(default)]
    pub tools: Vec<ToolDefinition>,
    #[builder(default)]
    pub tool_choice: ToolChoice,
    #[builder(default = 4096)]
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    #[builder(default)]
    pub stream: bool,
}

/// Bidirectional converter between canonical and backend-native shapes.
pub trait ProtocolAdapter: Send + Sync {
    /// Adapter id (e.g. "anthropic", "openai").
    fn id(&self) -> &str;

    /// Model used when neither the caller nor the config picks one.
    fn default_model(&self) -> &str;

    /// Map an alias to a concrete model id. Unknown names pass through.
    fn resolve_model(&self, alias: &str) -> String;

    fn to_provider_tools(&self, tools: &[ToolDefinition]) -> Value;

    fn to_provider_messages(&self, messages: &[CanonicalMessage]) -> Value;

    /// Parse a backend-native message list back into canonical messages.
    fn from_provider_messages(&self, messages: &Value) -> Result<Vec<CanonicalMessage>>;

    fn build_request(&self, params: &RequestParams) -> Value;

    fn from_provider_response(&self, response: &Value) -> Result<CanonicalResponse>;

    /// Classify an error using vendor knowledge of error bodies.
    fn normalize_error(&self, error: &ConductorError) -> NormalizedError;

    /// A fresh stream adapter for one response.
    fn stream_adapter(&self) -> Box<dyn StreamAdapter>;
}

/// Incremental parser for one streamed response.
pub trait StreamAdapter: Send {
    fn process_chunk(&mut self, chunk: &Value) -> Vec<CanonicalStreamEvent>;

    /// Flush a pending `message_end` once the byte stream is exhausted.
    fn finish(&mut self) -> Vec<CanonicalStreamEvent>;

    /// The assistant message assembled so far.
    fn get_final_message(&self) -> CanonicalMessage;

    fn stop_reason(&self) -> StopReason;

    fn usage(&self) -> Usage;

    /// Discard all per-response state.
    fn reset(&mut self);
}

/// Moves backend-native JSON to and from a model endpoint.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn send(&self, request: &Value) -> Result<Value>;

    /// Stream raw JSON chunks. Errors may arrive before or during the stream.
    async fn send_stream(&self, request: &Value) -> Result<BoxStream<'static, Result<Value>>>;
}

/// Built-in adapter families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AdapterKind {
    Anthropic,
    #[strum(serialize = "openai")]
    OpenAi,
}

/// An adapter paired with the transport that reaches its backend.
#[derive(Clone)]
pub struct Backend {
    pub adapter: Arc<dyn ProtocolAdapter>,
    pub transport: Arc<dyn ModelTransport>,
}

impl Backend {
    pub fn new(adapter: Arc<dyn ProtocolAdapter>, transport: Arc<dyn ModelTransport>) -> Self {
        Self { adapter, transport }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("adapter", &self.adapter.id())
            .finish()
    }
}

/// Create the adapter alone, without credentials.
#[allow(unused_variables)]
pub fn create_adapter(
    adapter_id: &str,
    config: &ConductorConfig,
) -> Result<Arc<dyn ProtocolAdapter>> {
    let kind: AdapterKind = adapter_id
        .parse()
        .map_err(|_| ConductorError::UnknownAdapter(adapter_id.to_string()))?;
    let aliases = config
        .settings
        .aliases
        .get(adapter_id)
        .cloned()
        .unwrap_or_else(HashMap::new);

    match kind {
        #[cfg(feature = "anthropic")]
        AdapterKind::Anthropic => Ok(Arc::new(
            anthropic::AnthropicAdapter::new().with_aliases(aliases),
        )),
        #[cfg(feature = "openai")]
        AdapterKind::OpenAi => Ok(Arc::new(
            openai::OpenAiAdapter::new(config.settings.openai.strict_tools).with_aliases(aliases),
        )),
        #[allow(unreachable_patterns)]
        _ => Err(ConductorError::UnknownAdapter(format!(
            "adapter '{adapter_id}' not enabled via feature flags"
        ))),
    }
}

/// Create an adapter plus HTTP transport for the given adapter id.
#[allow(unused_variables)]
pub fn create_backend(adapter_id: &str, config: &ConductorConfig) -> Result<Backend> {
    let adapter = create_adapter(adapter_id, config)?;
    let kind: AdapterKind = adapter_id
        .parse()
        .map_err(|_| ConductorError::UnknownAdapter(adapter_id.to_string()))?;

    let transport: Arc<dyn ModelTransport> = match kind {
        #[cfg(feature = "anthropic")]
        AdapterKind::Anthropic => {
            let api_key = config
                .get_api_key("anthropic")
                .ok_or_else(|| ConductorError::Authentication("Missing ANTHROPIC_API_KEY".into()))?;
            let base_url = config
                .get_base_url("anthropic")
                .unwrap_or_else(|| anthropic::DEFAULT_BASE_URL.to_string());
            Arc::new(http::HttpTransport::new(
                format!("{base_url}/messages"),
                http::anthropic_headers(&api_key, anthropic::API_VERSION),
            ))
        }
        #[cfg(feature = "openai")]
        AdapterKind::OpenAi => {
            let api_key = config
                .get_api_key("openai")
                .ok_or_else(|| ConductorError::Authentication("Missing OPENAI_API_KEY".into()))?;
            let base_url = config
                .get_base_url("openai")
                .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string());
            Arc::new(http::HttpTransport::new(
                format!("{base_url}/chat/completions"),
                http::bearer_headers(&api_key),
            ))
        }
        #[allow(unreachable_patterns)]
        _ => {
            return Err(ConductorError::UnknownAdapter(format!(
                "adapter '{adapter_id}' not enabled via feature flags"
            )))
        }
    };

    Ok(Backend::new(adapter, transport))
}
