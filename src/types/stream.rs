//! Streaming event types and stop reasons.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::message::CanonicalMessage;
use super::usage::Usage;
use crate::error::NormalizedError;

/// Why a model turn ended, normalised across backends.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    Error,
}

/// Incremental event produced while a response streams in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalStreamEvent {
    MessageStart {
        id: String,
    },
    TextDelta {
        text: String,
    },
    ToolUseStart {
        id: String,
        name: String,
    },
    ToolUseInputDelta {
        id: String,
        partial_json: String,
    },
    ToolUseEnd {
        id: String,
    },
    MessageEnd {
        stop_reason: StopReason,
        usage: Usage,
    },
    Error {
        error: NormalizedError,
    },
}

/// A parsed, complete model response.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalResponse {
    pub message: CanonicalMessage,
    pub stop_reason: StopReason,
    pub usage: Usage,
}
