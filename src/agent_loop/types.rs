//! Core turn types for the agent loop.

use std::path::PathBuf;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::NormalizedError;
use crate::types::{CanonicalMessage, StopReason, ToolChoice, Usage};

/// How a successful turn ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The model stopped requesting tools.
    Completed,
    /// A plan proposal ended the turn early.
    PlanProposed,
    Cancelled,
}

/// Result of a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResult {
    pub transcript: Vec<CanonicalMessage>,
    pub outcome: TurnOutcome,
    /// Model calls made.
    pub iterations: usize,
    pub usage: Usage,
    pub stop_reason: StopReason,
}

impl TurnResult {
    /// Text of the last assistant message.
    pub fn final_text(&self) -> String {
        self.transcript
            .iter()
            .rev()
            .find(|m| m.role == crate::types::Role::Assistant)
            .map(|m| m.text())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    /// A backend error that was fatal or outlived its retries.
    #[error("backend error: {error}")]
    Backend { error: NormalizedError },
    #[error("tool loop exceeded {limit} iterations")]
    TooManyIterations { limit: usize },
    /// The task driving the turn died.
    #[error("turn aborted: {message}")]
    Aborted { message: String },
}

/// A failed turn. The partial transcript stays well paired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("{kind}")]
pub struct TurnFailure {
    pub kind: FailureKind,
    pub transcript: Vec<CanonicalMessage>,
    pub usage: Usage,
}

/// Per-turn knobs. Unset fields fall back to the runtime settings.
#[derive(Debug, Clone, Default, Builder)]
pub struct TurnOptions {
    #[builder(into)]
    pub session_id: Option<String>,
    #[builder(into)]
    pub working_dir: Option<PathBuf>,
    #[builder(into)]
    pub model: Option<String>,
    #[builder(into)]
    pub system_prompt: Option<String>,
    /// Lowers the iteration ceiling for this turn. Never raises it.
    pub max_iterations: Option<usize>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stream: Option<bool>,
    #[builder(default)]
    pub tool_choice: ToolChoice,
    /// Restrict execution to the read-only plan-mode tools.
    #[builder(default)]
    pub plan_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_names_the_limit() {
        let failure = TurnFailure {
            kind: FailureKind::TooManyIterations { limit: 25 },
            transcript: Vec::new(),
            usage: Usage::default(),
        };
        assert_eq!(failure.to_string(), "tool loop exceeded 25 iterations");
    }

    #[test]
    fn final_text_reads_last_assistant_message() {
        let result = TurnResult {
            transcript: vec![
                CanonicalMessage::user("hi"),
                CanonicalMessage::assistant("first"),
                CanonicalMessage::assistant("second"),
            ],
            outcome: TurnOutcome::Completed,
            iterations: 2,
            usage: Usage::default(),
            stop_reason: StopReason::EndTurn,
        };
        assert_eq!(result.final_text(), "second");
    }

    #[test]
    fn options_builder_leaves_unset_fields_empty() {
        let options = TurnOptions::builder().session_id("s").plan_mode(true).build();
        assert_eq!(options.session_id.as_deref(), Some("s"));
        assert!(options.plan_mode);
        assert!(options.max_iterations.is_none());
        assert_eq!(options.tool_choice, ToolChoice::Auto);
    }
}
