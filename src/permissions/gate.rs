//! Pending-request table: permission decisions and questions for a human.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent_loop::events::{AgentEventPayload, EventEmitter};
use crate::config::PermissionSettings;
use crate::types::{PermissionLevel, ToolCall};

pub const PERMISSION_DENIED: &str = "Permission denied";
pub const REQUEST_EXPIRED: &str = "Permission request expired";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Approve or deny a tool call.
    Permission,
    /// Free-text answer to a model question.
    Question,
}

/// A request waiting on a human.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionRequest {
    pub request_id: String,
    pub kind: RequestKind,
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_use_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

/// What the gate decided for one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    /// Never run; the message becomes the error result.
    Rejected(String),
    /// The turn was cancelled while waiting.
    Cancelled,
}

#[derive(Debug)]
enum Resolution {
    Approved,
    Denied,
    Answered(String),
    Expired,
}

enum WaitOutcome {
    Resolved(Resolution),
    TimedOut,
    Cancelled,
}

struct Pending {
    request: PermissionRequest,
    created: Instant,
    responder: oneshot::Sender<Resolution>,
}

struct GateInner {
    pending: Mutex<HashMap<String, Pending>>,
    settings: PermissionSettings,
}

/// Suspends tool calls until a human decides.
///
/// Every request is resolved at most once: by `resolve`/`answer`, by its
/// waiter timing out or being cancelled, or by the expiry sweep. Whichever
/// comes first removes the entry.
#[derive(Clone)]
pub struct PermissionGate {
    inner: Arc<GateInner>,
}

impl PermissionGate {
    pub fn new(settings: PermissionSettings) -> Self {
        Self {
            inner: Arc::new(GateInner {
                pending: Mutex::new(HashMap::new()),
                settings,
            }),
        }
    }

    /// Apply `level` to `call`, waiting on a human for `Ask`.
    pub async fn authorize(
        &self,
        call: &ToolCall,
        level: PermissionLevel,
        events: &EventEmitter,
        cancel: &CancellationToken,
    ) -> GateDecision {
        match level {
            PermissionLevel::Auto => GateDecision::Allowed,
            PermissionLevel::Blocked => {
                debug!(tool = %call.name, "tool blocked by policy");
                GateDecision::Rejected(format!("Tool '{}' is blocked by permission policy", call.name))
            }
            PermissionLevel::Ask => {
                let (request, rx) = self.register(
                    RequestKind::Permission,
                    call.name.clone(),
                    call.input_value(),
                    call.id.clone(),
                    events.session_id().to_string(),
                    None,
                );
                let request_id = request.request_id.clone();
                info!(request_id = %request_id, tool = %call.name, "permission requested");
                events.emit(AgentEventPayload::PermissionRequest { request });

                match self.wait(&request_id, rx, cancel).await {
                    WaitOutcome::Resolved(Resolution::Approved) => GateDecision::Allowed,
                    WaitOutcome::Resolved(Resolution::Denied) => {
                        GateDecision::Rejected(PERMISSION_DENIED.to_string())
                    }
                    WaitOutcome::Resolved(Resolution::Expired) => {
                        GateDecision::Rejected(REQUEST_EXPIRED.to_string())
                    }
                    WaitOutcome::Resolved(Resolution::Answered(_)) => {
                        GateDecision::Rejected(PERMISSION_DENIED.to_string())
                    }
                    WaitOutcome::TimedOut => GateDecision::Rejected(format!(
                        "Permission request timed out after {}s",
                        self.inner.settings.timeout_secs
                    )),
                    WaitOutcome::Cancelled => GateDecision::Cancelled,
                }
            }
        }
    }

    /// Pose a question and wait for the answer text.
    pub async fn ask_question(
        &self,
        question: &str,
        tool_use_id: &str,
        events: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<String, String> {
        let (request, rx) = self.register(
            RequestKind::Question,
            "AskUser".to_string(),
            serde_json::json!({ "question": question }),
            tool_use_id.to_string(),
            events.session_id().to_string(),
            Some(question.to_string()),
        );
        let request_id = request.request_id.clone();
        info!(request_id = %request_id, "question asked");
        events.emit(AgentEventPayload::Question {
            request_id: request_id.clone(),
            question: question.to_string(),
        });

        match self.wait(&request_id, rx, cancel).await {
            WaitOutcome::Resolved(Resolution::Answered(text)) => Ok(text),
            WaitOutcome::Resolved(Resolution::Expired) => Err("Question expired without an answer".into()),
            WaitOutcome::Resolved(_) => Err("Question was dismissed".into()),
            WaitOutcome::TimedOut => Err(format!(
                "Question timed out after {}s",
                self.inner.settings.timeout_secs
            )),
            WaitOutcome::Cancelled => Err("cancelled".into()),
        }
    }

    /// Approve or deny a permission request. True only for the call that
    /// actually resolved it.
    pub fn resolve(&self, request_id: &str, approved: bool) -> bool {
        let resolution = if approved {
            Resolution::Approved
        } else {
            Resolution::Denied
        };
        self.complete(request_id, RequestKind::Permission, resolution)
    }

    /// Answer a question. True only for the call that actually resolved it.
    pub fn answer(&self, request_id: &str, answer: impl Into<String>) -> bool {
        self.complete(request_id, RequestKind::Question, Resolution::Answered(answer.into()))
    }

    /// Snapshot of one pending request.
    pub fn status(&self, request_id: &str) -> Option<PermissionRequest> {
        self.lock().get(request_id).map(|p| p.request.clone())
    }

    /// Snapshot of all pending requests, oldest first.
    pub fn pending(&self) -> Vec<PermissionRequest> {
        let mut requests: Vec<PermissionRequest> =
            self.lock().values().map(|p| p.request.clone()).collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        requests
    }

    /// Expire entries older than the configured ceiling. Returns how many.
    pub fn sweep_expired(&self) -> usize {
        let expiry = self.inner.settings.expiry();
        let expired: Vec<Pending> = {
            let mut pending = self.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.created.elapsed() >= expiry)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        let count = expired.len();
        for entry in expired {
            warn!(request_id = %entry.request.request_id, tool = %entry.request.tool_name, "permission request expired");
            let _ = entry.responder.send(Resolution::Expired);
        }
        count
    }

    /// Run [`sweep_expired`](Self::sweep_expired) on an interval until every
    /// gate handle is dropped.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        let weak: Weak<GateInner> = Arc::downgrade(&self.inner);
        let period = self.inner.settings.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let swept = PermissionGate { inner }.sweep_expired();
                if swept > 0 {
                    debug!(swept, "permission sweep");
                }
            }
        })
    }

    fn register(
        &self,
        kind: RequestKind,
        tool_name: String,
        tool_input: Value,
        tool_use_id: String,
        session_id: String,
        question: Option<String>,
    ) -> (PermissionRequest, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        let request = PermissionRequest {
            request_id: format!("perm_{}", Uuid::new_v4().simple()),
            kind,
            tool_name,
            tool_input,
            tool_use_id,
            session_id,
            created_at: Utc::now(),
            question,
        };
        self.lock().insert(
            request.request_id.clone(),
            Pending {
                request: request.clone(),
                created: Instant::now(),
                responder: tx,
            },
        );
        (request, rx)
    }

    async fn wait(
        &self,
        request_id: &str,
        rx: oneshot::Receiver<Resolution>,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        let timeout = self.inner.settings.timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.lock().remove(request_id);
                debug!(request_id, "permission wait cancelled");
                WaitOutcome::Cancelled
            }
            res = tokio::time::timeout(timeout, rx) => match res {
                Ok(Ok(resolution)) => WaitOutcome::Resolved(resolution),
                // sender dropped without a decision
                Ok(Err(_)) => WaitOutcome::Resolved(Resolution::Expired),
                Err(_) => {
                    self.lock().remove(request_id);
                    warn!(request_id, "permission request timed out");
                    WaitOutcome::TimedOut
                }
            }
        }
    }

    fn complete(&self, request_id: &str, kind: RequestKind, resolution: Resolution) -> bool {
        let entry = {
            let mut pending = self.lock();
            match pending.get(request_id) {
                Some(p) if p.request.kind == kind => pending.remove(request_id),
                _ => None,
            }
        };
        let Some(entry) = entry else {
            debug!(request_id, "no pending request to resolve");
            return false;
        };
        debug!(request_id, resolution = ?resolution, "request resolved");
        entry.responder.send(resolution).is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        // a poisoned table still holds valid entries
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGate")
            .field("pending", &self.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::agent_loop::events::AgentEvent;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "toolu_1".into(),
            name: name.into(),
            input: Map::new(),
        }
    }

    fn gate_with(timeout_secs: u64, expiry_secs: u64) -> PermissionGate {
        PermissionGate::new(PermissionSettings {
            timeout_secs,
            expiry_secs,
            ..PermissionSettings::default()
        })
    }

    async fn next_request_id(rx: &mut UnboundedReceiver<AgentEvent>) -> String {
        match rx.recv().await.unwrap().payload {
            AgentEventPayload::PermissionRequest { request } => request.request_id,
            AgentEventPayload::Question { request_id, .. } => request_id,
            other => panic!("unexpected event {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Levels
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn auto_and_blocked_never_wait() {
        let gate = gate_with(300, 600);
        let events = EventEmitter::noop("s");
        let cancel = CancellationToken::new();
        assert_eq!(
            gate.authorize(&call("Read"), PermissionLevel::Auto, &events, &cancel).await,
            GateDecision::Allowed
        );
        assert!(matches!(
            gate.authorize(&call("Bash"), PermissionLevel::Blocked, &events, &cancel).await,
            GateDecision::Rejected(msg) if msg.contains("blocked")
        ));
        assert!(gate.pending().is_empty());
    }

    // -----------------------------------------------------------------------
    // Ask
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn approve_then_second_resolve_is_false() {
        let gate = gate_with(300, 600);
        let (events, mut rx) = EventEmitter::channel("s");
        let cancel = CancellationToken::new();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.authorize(&call("Bash"), PermissionLevel::Ask, &events, &cancel).await
            })
        };
        let id = next_request_id(&mut rx).await;
        assert_eq!(gate.status(&id).unwrap().tool_name, "Bash");

        assert!(gate.resolve(&id, true));
        assert!(!gate.resolve(&id, false));
        assert!(!gate.resolve(&id, true));
        assert_eq!(waiter.await.unwrap(), GateDecision::Allowed);
        assert!(gate.status(&id).is_none());
    }

    #[tokio::test]
    async fn deny_yields_permission_denied() {
        let gate = gate_with(300, 600);
        let (events, mut rx) = EventEmitter::channel("s");
        let cancel = CancellationToken::new();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.authorize(&call("Bash"), PermissionLevel::Ask, &events, &cancel).await
            })
        };
        let id = next_request_id(&mut rx).await;
        assert!(gate.resolve(&id, false));
        assert_eq!(
            waiter.await.unwrap(),
            GateDecision::Rejected(PERMISSION_DENIED.to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out_and_is_removed() {
        let gate = gate_with(300, 600);
        let (events, _rx) = EventEmitter::channel("s");
        let decision = gate
            .authorize(&call("Bash"), PermissionLevel::Ask, &events, &CancellationToken::new())
            .await;
        assert_eq!(
            decision,
            GateDecision::Rejected("Permission request timed out after 300s".into())
        );
        assert!(gate.pending().is_empty());
    }

    #[tokio::test]
    async fn cancellation_releases_the_wait() {
        let gate = gate_with(300, 600);
        let (events, mut rx) = EventEmitter::channel("s");
        let cancel = CancellationToken::new();
        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                gate.authorize(&call("Bash"), PermissionLevel::Ask, &events, &cancel).await
            })
        };
        let id = next_request_id(&mut rx).await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), GateDecision::Cancelled);
        assert!(!gate.resolve(&id, true));
    }

    // -----------------------------------------------------------------------
    // Sweep
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn sweep_expires_old_requests() {
        let gate = gate_with(3600, 10);
        let (events, mut rx) = EventEmitter::channel("s");
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.authorize(&call("Write"), PermissionLevel::Ask, &events, &CancellationToken::new())
                    .await
            })
        };
        let id = next_request_id(&mut rx).await;

        assert_eq!(gate.sweep_expired(), 0);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(gate.sweep_expired(), 1);
        assert_eq!(
            waiter.await.unwrap(),
            GateDecision::Rejected(REQUEST_EXPIRED.to_string())
        );
        assert!(!gate.resolve(&id, true));
    }

    // -----------------------------------------------------------------------
    // Questions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn questions_only_resolve_through_answer() {
        let gate = gate_with(300, 600);
        let (events, mut rx) = EventEmitter::channel("s");
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.ask_question("Which branch?", "toolu_9", &events, &CancellationToken::new())
                    .await
            })
        };
        let id = next_request_id(&mut rx).await;
        assert_eq!(gate.status(&id).unwrap().kind, RequestKind::Question);

        assert!(!gate.resolve(&id, true));
        assert!(gate.answer(&id, "main"));
        assert!(!gate.answer(&id, "dev"));
        assert_eq!(waiter.await.unwrap(), Ok("main".to_string()));
    }
}
