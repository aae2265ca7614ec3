//! Spawns child turn loops and tracks them to a terminal state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bon::Builder;
use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use super::types::{SubAgentStatus, SubAgentTask, SubAgentType};
use crate::agent_loop::events::{
    AgentEvent, AgentEventPayload, AgentEventSink, AgentEventStream, EventEmitter,
};
use crate::agent_loop::runner::AgentRunner;
use crate::agent_loop::types::{TurnFailure, TurnOptions, TurnOutcome, TurnResult};
use crate::config::RuntimeSettings;
use crate::permissions::PermissionGate;
use crate::provider::Backend;
use crate::tools::{ToolEngine, ToolRegistry};
use crate::types::CanonicalMessage;

/// Parameters for one sub-agent.
#[derive(Debug, Clone, Builder)]
pub struct SpawnRequest {
    pub task_type: SubAgentType,
    #[builder(into)]
    pub prompt: String,
    /// Capped at the loop ceiling; falls back to the configured default.
    pub max_turns: Option<usize>,
    /// Parent session scope.
    #[builder(into)]
    pub scope: String,
    #[builder(into)]
    pub working_dir: Option<PathBuf>,
    /// Receives `sub_agent_update` and forwarded permission requests.
    #[builder(default)]
    pub events: EventEmitter,
    /// Cancelling it stops the child too.
    pub parent_cancel: Option<CancellationToken>,
}

struct Entry {
    task: SubAgentTask,
    cancel: CancellationToken,
    events: EventEmitter,
    /// Terminal snapshot already handed to an awaiter.
    delivered: bool,
}

struct Inner {
    backend: Backend,
    registry: ToolRegistry,
    gate: PermissionGate,
    settings: Arc<RuntimeSettings>,
    tasks: Mutex<HashMap<String, Entry>>,
    scopes: Mutex<HashMap<String, CancellationToken>>,
}

/// Owns the sub-agent task table.
#[derive(Clone)]
pub struct SubAgentOrchestrator {
    inner: Arc<Inner>,
}

impl SubAgentOrchestrator {
    /// `registry` is the parent's tool set; each type receives a subset of it.
    pub fn new(
        backend: Backend,
        registry: ToolRegistry,
        gate: PermissionGate,
        settings: Arc<RuntimeSettings>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                registry,
                gate,
                settings,
                tasks: Mutex::new(HashMap::new()),
                scopes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a child loop on its own task and return its id.
    pub fn spawn(&self, request: SpawnRequest) -> String {
        let settings = &self.inner.settings;
        let max_turns = request
            .max_turns
            .unwrap_or(settings.subagents.default_max_turns)
            .min(settings.agent.max_iterations)
            .max(1);
        let id = format!("task_{}", Uuid::new_v4().simple());
        let cancel = self.scope_token(&request.scope).child_token();
        let task = SubAgentTask {
            id: id.clone(),
            task_type: request.task_type,
            status: SubAgentStatus::Running,
            turns: 0,
            max_turns,
            result: None,
            error: None,
            prompt: request.prompt.clone(),
            session_id: request.scope.clone(),
            created_at: Utc::now(),
            finished_at: None,
        };
        self.tasks().insert(
            id.clone(),
            Entry {
                task: task.clone(),
                cancel: cancel.clone(),
                events: request.events.clone(),
                delivered: false,
            },
        );
        info!(task_id = %id, task_type = %request.task_type, max_turns, scope = %request.scope, "spawned sub-agent");
        request.events.emit(AgentEventPayload::SubAgentUpdate { task });

        let task_type = request.task_type;
        let engine = ToolEngine::new(self.inner.registry.subset(|name| task_type.allows(name)));
        let runner = AgentRunner::new(
            self.inner.backend.clone(),
            engine,
            self.inner.gate.clone(),
            settings.clone(),
        );
        let options = TurnOptions::builder()
            .session_id(id.clone())
            .maybe_working_dir(request.working_dir)
            .max_iterations(max_turns)
            .system_prompt(task_type.system_prompt())
            .build();
        let emitter = EventEmitter::new(id.clone(), self.progress_sink(&id, request.events));
        let transcript = vec![CanonicalMessage::user(request.prompt)];
        let parent_cancel = request.parent_cancel;
        let orchestrator = self.clone();
        let task_id = id.clone();

        tokio::spawn(
            async move {
                let link = parent_cancel.map(|parent| {
                    let child = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = parent.cancelled() => child.cancel(),
                            _ = child.cancelled() => {}
                        }
                    })
                });
                let outcome = runner.run(transcript, options, emitter, cancel).await;
                if let Some(link) = link {
                    link.abort();
                }
                orchestrator.finish(&task_id, outcome);
            }
            .instrument(info_span!("sub_agent", task_id = %id)),
        );

        id
    }

    /// Wait until every task in `scope` is terminal or `timeout` elapses.
    ///
    /// Returns the scope's tasks that have not been handed out yet. Terminal
    /// tasks are marked delivered and never returned again.
    pub async fn await_all(&self, scope: &str, timeout: Option<Duration>) -> Vec<SubAgentTask> {
        let config = self.inner.settings.subagents;
        let timeout = timeout.unwrap_or(Duration::from_secs(config.await_timeout_secs));
        let poll = Duration::from_millis(config.poll_interval_ms.max(1));
        let deadline = Instant::now() + timeout;

        loop {
            if self.all_terminal(scope) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(scope, "await timed out with tasks still running");
                break;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }

        let mut tasks: Vec<SubAgentTask> = self
            .tasks()
            .values_mut()
            .filter(|entry| entry.task.session_id == scope && !entry.delivered)
            .map(|entry| {
                if entry.task.status.is_terminal() {
                    entry.delivered = true;
                }
                entry.task.clone()
            })
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Stop a running task. Returns false if it is unknown or already terminal.
    pub fn cancel(&self, task_id: &str) -> bool {
        let (task, events) = {
            let mut tasks = self.tasks();
            let Some(entry) = tasks.get_mut(task_id) else {
                return false;
            };
            if entry.task.status.is_terminal() {
                return false;
            }
            entry.cancel.cancel();
            entry.task.status = SubAgentStatus::Cancelled;
            entry.task.finished_at = Some(Utc::now());
            (entry.task.clone(), release(&mut entry.events))
        };
        info!(task_id, "cancelled sub-agent");
        events.emit(AgentEventPayload::SubAgentUpdate { task });
        true
    }

    /// Cancel every running task in `scope`. Returns how many were running.
    pub fn cancel_scope(&self, scope: &str) -> usize {
        if let Some(token) = self.scopes().remove(scope) {
            token.cancel();
        }
        let running: Vec<String> = self
            .tasks()
            .values()
            .filter(|e| e.task.session_id == scope && !e.task.status.is_terminal())
            .map(|e| e.task.id.clone())
            .collect();
        running.iter().filter(|id| self.cancel(id)).count()
    }

    pub fn get(&self, task_id: &str) -> Option<SubAgentTask> {
        self.tasks().get(task_id).map(|e| e.task.clone())
    }

    /// Snapshots of a scope, without marking anything delivered.
    pub fn list(&self, scope: &str) -> Vec<SubAgentTask> {
        let mut tasks: Vec<SubAgentTask> = self
            .tasks()
            .values()
            .filter(|e| e.task.session_id == scope)
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Forget the tasks in `scope` whose results were already handed out,
    /// and the scope itself once nothing in it is running. Returns how many
    /// tasks were dropped.
    pub fn prune(&self, scope: &str) -> usize {
        let (dropped, idle) = {
            let mut tasks = self.tasks();
            let before = tasks.len();
            tasks.retain(|_, e| !(e.task.session_id == scope && e.delivered));
            let idle = !tasks
                .values()
                .any(|e| e.task.session_id == scope && !e.task.status.is_terminal());
            (before - tasks.len(), idle)
        };
        if idle {
            self.scopes().remove(scope);
        }
        if dropped > 0 {
            debug!(scope, dropped, "pruned delivered sub-agents");
        }
        dropped
    }

    fn all_terminal(&self, scope: &str) -> bool {
        self.tasks()
            .values()
            .filter(|e| e.task.session_id == scope)
            .all(|e| e.task.status.is_terminal())
    }

    fn scope_token(&self, scope: &str) -> CancellationToken {
        self.scopes()
            .entry(scope.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Counts iterations and forwards approval requests to the parent.
    fn progress_sink(&self, task_id: &str, parent: EventEmitter) -> AgentEventSink {
        let orchestrator = self.clone();
        let task_id = task_id.to_string();
        Arc::new(move |event: AgentEvent| match event.payload {
            AgentEventPayload::IterationStarted { iteration } => {
                let snapshot = orchestrator.tasks().get_mut(&task_id).and_then(|entry| {
                    if entry.task.status.is_terminal() {
                        return None;
                    }
                    entry.task.turns = iteration;
                    Some(entry.task.clone())
                });
                if let Some(task) = snapshot {
                    parent.emit(AgentEventPayload::SubAgentUpdate { task });
                }
            }
            payload if payload.stream() == AgentEventStream::Approval => parent.emit(payload),
            _ => {}
        })
    }

    fn finish(&self, task_id: &str, outcome: Result<TurnResult, TurnFailure>) {
        let (task, events) = {
            let mut tasks = self.tasks();
            let Some(entry) = tasks.get_mut(task_id) else {
                return;
            };
            let task = &mut entry.task;
            match outcome {
                Ok(result) => {
                    task.turns = result.iterations;
                    if task.status == SubAgentStatus::Running {
                        task.status = match result.outcome {
                            TurnOutcome::Cancelled => SubAgentStatus::Cancelled,
                            TurnOutcome::Completed | TurnOutcome::PlanProposed => {
                                SubAgentStatus::Completed
                            }
                        };
                    }
                    let text = result_text(&result);
                    task.result = (!text.is_empty()).then_some(text);
                }
                Err(failure) => {
                    if task.status == SubAgentStatus::Running {
                        task.status = SubAgentStatus::Failed;
                    }
                    task.error = Some(failure.to_string());
                }
            }
            task.finished_at.get_or_insert_with(Utc::now);
            let task = task.clone();
            (task, release(&mut entry.events))
        };
        info!(task_id, status = %task.status, turns = task.turns, "sub-agent finished");
        events.emit(AgentEventPayload::SubAgentUpdate { task });
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn scopes(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.inner
            .scopes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SubAgentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubAgentOrchestrator")
            .field("backend", &self.inner.backend)
            .field("tasks", &self.tasks().len())
            .finish()
    }
}

/// Take the parent emitter out of a terminal entry so the parent's event
/// stream can close.
fn release(events: &mut EventEmitter) -> EventEmitter {
    let session_id = events.session_id().to_string();
    std::mem::replace(events, EventEmitter::noop(session_id))
}

/// The plan for plan proposals, otherwise the last assistant text.
fn result_text(result: &TurnResult) -> String {
    if result.outcome == TurnOutcome::PlanProposed {
        let plan = result
            .transcript
            .iter()
            .rev()
            .flat_map(|m| m.tool_calls())
            .find(|call| call.name == "ProposePlan")
            .and_then(|call| call.input.get("plan").and_then(Value::as_str).map(str::to_string));
        if let Some(plan) = plan {
            return plan;
        }
    }
    result.final_text()
}
