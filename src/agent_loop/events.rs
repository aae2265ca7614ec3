//! Turn event stream types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NormalizedError;
use crate::permissions::PermissionRequest;
use crate::subagents::SubAgentTask;
use crate::types::{CanonicalStreamEvent, StopReason, ToolCall, ToolOutput, Usage};

use super::types::TurnOutcome;

/// Stream category for events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventStream {
    Lifecycle,
    Assistant,
    Tool,
    Approval,
    Plan,
    SubAgent,
}

/// Concrete event payloads emitted by the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEventPayload {
    // -- Model streaming --
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

    // -- Loop --
    IterationStarted {
        iteration: usize,
    },
    /// The model call is repeated. Stream events already emitted for the
    /// failed attempt are void: listeners drop any partial text or tool input
    /// they assembled from it.
    Retrying {
        attempt: u32,
        delay_ms: u64,
        error: NormalizedError,
    },
    Compacted {
        removed: usize,
        kept: usize,
    },

    // -- Tools --
    ToolExecutionStart {
        call: ToolCall,
    },
    ToolExecutionEnd {
        tool_use_id: String,
        tool_name: String,
        output: ToolOutput,
    },

    // -- Human in the loop --
    PermissionRequest {
        request: PermissionRequest,
    },
    Question {
        request_id: String,
        question: String,
    },
    PlanProposed {
        plan: String,
    },

    SubAgentUpdate {
        task: SubAgentTask,
    },

    TurnCompleted {
        outcome: TurnOutcome,
        iterations: usize,
        usage: Usage,
    },
    TurnFailed {
        error: String,
    },
}

impl AgentEventPayload {
    pub fn stream(&self) -> AgentEventStream {
        match self {
            Self::MessageStart { .. }
            | Self::TextDelta { .. }
            | Self::MessageEnd { .. } => AgentEventStream::Assistant,
            Self::ToolUseStart { .. }
            | Self::ToolUseInputDelta { .. }
            | Self::ToolUseEnd { .. }
            | Self::ToolExecutionStart { .. }
            | Self::ToolExecutionEnd { .. } => AgentEventStream::Tool,
            Self::PermissionRequest { .. } | Self::Question { .. } => AgentEventStream::Approval,
            Self::PlanProposed { .. } => AgentEventStream::Plan,
            Self::SubAgentUpdate { .. } => AgentEventStream::SubAgent,
            Self::Error { .. }
            | Self::IterationStarted { .. }
            | Self::Retrying { .. }
            | Self::Compacted { .. }
            | Self::TurnCompleted { .. }
            | Self::TurnFailed { .. } => AgentEventStream::Lifecycle,
        }
    }
}

impl From<CanonicalStreamEvent> for AgentEventPayload {
    fn from(event: CanonicalStreamEvent) -> Self {
        match event {
            CanonicalStreamEvent::MessageStart { id } => Self::MessageStart { id },
            CanonicalStreamEvent::TextDelta { text } => Self::TextDelta { text },
            CanonicalStreamEvent::ToolUseStart { id, name } => Self::ToolUseStart { id, name },
            CanonicalStreamEvent::ToolUseInputDelta { id, partial_json } => {
                Self::ToolUseInputDelta { id, partial_json }
            }
            CanonicalStreamEvent::ToolUseEnd { id } => Self::ToolUseEnd { id },
            CanonicalStreamEvent::MessageEnd { stop_reason, usage } => {
                Self::MessageEnd { stop_reason, usage }
            }
            CanonicalStreamEvent::Error { error } => Self::Error { error },
        }
    }
}

/// Envelope for streamed turn events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEvent {
    pub session_id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub stream: AgentEventStream,
    pub payload: AgentEventPayload,
}

/// Callback used for streaming turn events.
pub type AgentEventSink = Arc<dyn Fn(AgentEvent) + Send + Sync>;

/// Stamps payloads with a session id and a per-emitter sequence number.
///
/// Clones share the sequence, so events from concurrent tool executions are
/// still totally ordered.
#[derive(Clone)]
pub struct EventEmitter {
    session_id: Arc<str>,
    seq: Arc<AtomicU64>,
    sink: Option<AgentEventSink>,
}

impl EventEmitter {
    pub fn new(session_id: impl Into<String>, sink: AgentEventSink) -> Self {
        Self {
            session_id: Arc::from(session_id.into()),
            seq: Arc::new(AtomicU64::new(1)),
            sink: Some(sink),
        }
    }

    /// Emitter that drops everything.
    pub fn noop(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Arc::from(session_id.into()),
            seq: Arc::new(AtomicU64::new(1)),
            sink: None,
        }
    }

    /// Emitter backed by an unbounded channel.
    pub fn channel(
        session_id: impl Into<String>,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink: AgentEventSink = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (Self::new(session_id, sink), rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&self, payload: AgentEventPayload) {
        let Some(sink) = &self.sink else {
            return;
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        (sink)(AgentEvent {
            session_id: self.session_id.to_string(),
            seq,
            timestamp: Utc::now(),
            stream: payload.stream(),
            payload,
        });
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::noop("")
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("session_id", &self.session_id)
            .field("seq", &self.seq.load(Ordering::SeqCst))
            .finish()
    }
}
