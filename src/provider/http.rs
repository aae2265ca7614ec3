//! Shared HTTP client, SSE transport, and auth utilities.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use tracing::debug;

use crate::error::{ConductorError, Result};
use crate::util::timeout::with_timeout;

use super::ModelTransport;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            // no overall timeout; `send` bounds itself and the loop bounds stream idle time
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Build Anthropic-style headers (x-api-key).
pub fn anthropic_headers(api_key: &str, version: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(api_key) {
        headers.insert("x-api-key", val);
    }
    if let Ok(val) = HeaderValue::from_str(version) {
        headers.insert("anthropic-version", val);
    }
    headers
}

/// Map a non-success HTTP status to an error, keeping the raw body for
/// adapter-level classification.
pub fn status_to_error(status: u16, body: &str, retry_after_ms: Option<u64>) -> ConductorError {
    let retry_after_ms = retry_after_ms.or_else(|| extract_retry_after(body));
    match status {
        401 | 403 => ConductorError::Authentication(extract_message(body)),
        429 => ConductorError::RateLimited { retry_after_ms },
        _ => ConductorError::Api {
            status,
            message: extract_message(body),
            body: Some(body.to_string()),
            retry_after_ms,
        },
    }
}

/// Read a `retry-after` header given in seconds.
pub fn retry_after_header(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64)
}

fn extract_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

fn extract_retry_after(body: &str) -> Option<u64> {
    // Try to parse retry-after from JSON error body
    serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("retry_after"))
            .and_then(|r| r.as_f64())
            .map(|s| (s * 1000.0) as u64)
    })
}

/// JSON-over-HTTP transport with SSE streaming.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    url: String,
    headers: HeaderMap,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            url: url.into(),
            headers,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound on a whole non-streaming exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn send(&self, request: &Value) -> Result<Value> {
        debug!(url = %self.url, "model request");

        with_timeout(self.timeout, async {
            let resp = shared_client()
                .post(&self.url)
                .headers(self.headers.clone())
                .json(request)
                .send()
                .await?;

            let status = resp.status().as_u16();
            if !resp.status().is_success() {
                let retry_after = retry_after_header(resp.headers());
                let body_text = resp.text().await.unwrap_or_default();
                return Err(status_to_error(status, &body_text, retry_after));
            }

            Ok(resp.json().await?)
        })
        .await
    }

    async fn send_stream(&self, request: &Value) -> Result<BoxStream<'static, Result<Value>>> {
        debug!(url = %self.url, "model stream request");

        let builder = shared_client()
            .post(&self.url)
            .headers(self.headers.clone())
            .json(request);
        let mut source =
            EventSource::new(builder).map_err(|e| ConductorError::Stream(e.to_string()))?;

        let stream = async_stream::stream! {
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => {
                        if message.data == "[DONE]" {
                            break;
                        }
                        match serde_json::from_str::<Value>(&message.data) {
                            Ok(chunk) => yield Ok(chunk),
                            Err(e) => debug!(error = %e, "skipping unparseable SSE chunk"),
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        let retry_after = retry_after_header(response.headers());
                        let body_text = response.text().await.unwrap_or_default();
                        yield Err(status_to_error(status.as_u16(), &body_text, retry_after));
                        break;
                    }
                    Err(reqwest_eventsource::Error::Transport(e)) => {
                        yield Err(ConductorError::Network(e));
                        break;
                    }
                    Err(e) => {
                        yield Err(ConductorError::Stream(e.to_string()));
                        break;
                    }
                }
            }
            source.close();
        };

        Ok(Box::pin(stream))
    }
}
