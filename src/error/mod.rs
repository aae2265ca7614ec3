//! Error types for conductor.

pub mod unified;

pub use unified::{ErrorCode, NormalizedError};

use thiserror::Error;

/// Primary error type for all conductor operations.
#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Raw response body, kept so adapters can classify vendor error shapes.
        body: Option<String>,
        retry_after_ms: Option<u64>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{0}")]
    Normalized(NormalizedError),
}

impl ConductorError {
    /// Create an API error from a status code and body.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            body: None,
            retry_after_ms: None,
        }
    }

    /// Shorthand for a tool failure.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Transport-level classification, used when an adapter has no vendor
    /// specific reading of the error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Authentication(_) => ErrorCode::Auth,
            Self::RateLimited { .. } => ErrorCode::RateLimit,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Network(e) if e.is_timeout() => ErrorCode::Timeout,
            Self::Network(_) => ErrorCode::ServerError,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCode::Auth,
                408 | 504 => ErrorCode::Timeout,
                413 => ErrorCode::ContextLength,
                429 => ErrorCode::RateLimit,
                500..=599 => ErrorCode::ServerError,
                400..=499 => ErrorCode::InvalidRequest,
                _ => ErrorCode::Unknown,
            },
            Self::Stream(_) => ErrorCode::ServerError,
            Self::ToolExecution { .. } => ErrorCode::ToolError,
            Self::InvalidArgument(_) | Self::Serialization(_) => ErrorCode::InvalidRequest,
            Self::Normalized(n) => n.code,
            _ => ErrorCode::Unknown,
        }
    }

    /// Retry hint carried by the error, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => *retry_after_ms,
            Self::Api { retry_after_ms, .. } => *retry_after_ms,
            Self::Normalized(n) => n.retry_after_ms,
            _ => None,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Generic normalisation without vendor knowledge.
    pub fn normalize(&self) -> NormalizedError {
        if let Self::Normalized(n) = self {
            return n.clone();
        }
        let message = match self {
            Self::Api { message, .. } => message.clone(),
            other => other.to_string(),
        };
        NormalizedError::new(self.code(), message).with_retry_after(self.retry_after_ms())
    }
}

impl From<NormalizedError> for ConductorError {
    fn from(value: NormalizedError) -> Self {
        Self::Normalized(value)
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ConductorError>;
