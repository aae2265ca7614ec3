//! The surface a host application drives: turns, permissions, sub-agents.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent_loop::events::{AgentEvent, EventEmitter};
use crate::agent_loop::runner::AgentRunner;
use crate::agent_loop::types::{FailureKind, TurnFailure, TurnOptions, TurnResult};
use crate::config::{ConductorConfig, RuntimeSettings};
use crate::error::{ConductorError, Result};
use crate::permissions::{ask_user_tool, PermissionGate, PermissionRequest};
use crate::provider::{create_backend, Backend};
use crate::subagents::{sub_agent_tools, SpawnRequest, SubAgentOrchestrator, SubAgentTask, SubAgentType};
use crate::tools::builtin::{
    builtin_tools, BraveSearch, DirectorySkillStore, SearchBackend, SkillStore,
};
use crate::tools::{Tool, ToolEngine, ToolRegistry, READ_ONLY_TOOLS};
use crate::types::{CanonicalMessage, PermissionLevel, Usage};

const DEFAULT_ADAPTER: &str = "anthropic";

/// Which registered tools a turn may use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolSet {
    #[default]
    All,
    ReadOnly,
    /// Exactly these names; unknown ones are ignored.
    Only(Vec<String>),
}

impl ToolSet {
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::ReadOnly => READ_ONLY_TOOLS.contains(&name),
            Self::Only(names) => names.iter().any(|n| n == name),
        }
    }
}

/// An in-flight turn.
#[derive(Debug)]
pub struct TurnHandle {
    session_id: String,
    /// Events in emission order. Ends once the turn and any sub-agents it
    /// spawned are done.
    pub events: UnboundedReceiverStream<AgentEvent>,
    cancel: CancellationToken,
    task: JoinHandle<std::result::Result<TurnResult, TurnFailure>>,
}

impl TurnHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stop before the next model call. Running tools finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn result(self) -> std::result::Result<TurnResult, TurnFailure> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(TurnFailure {
                kind: FailureKind::Aborted {
                    message: err.to_string(),
                },
                transcript: Vec::new(),
                usage: Usage::default(),
            }),
        }
    }
}

/// Configures an [`AgentRuntime`].
pub struct AgentRuntimeBuilder {
    config: ConductorConfig,
    default_adapter: String,
    backend: Option<Backend>,
    tools: Vec<Arc<dyn Tool>>,
    search: Option<Arc<dyn SearchBackend>>,
    skills: Option<Arc<dyn SkillStore>>,
    working_dir: Option<PathBuf>,
}

impl AgentRuntimeBuilder {
    /// Adapter used for sub-agents and when no backend is supplied.
    pub fn default_adapter(mut self, adapter_id: impl Into<String>) -> Self {
        self.default_adapter = adapter_id.into();
        self
    }

    /// Use this backend instead of building one from credentials.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Register an extra tool next to the built-ins.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn search_backend(mut self, search: Arc<dyn SearchBackend>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn skill_store(mut self, skills: Arc<dyn SkillStore>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Default working directory for turns that do not set one.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Must be called inside a tokio runtime; starts the permission sweeper.
    pub fn build(self) -> Result<AgentRuntime> {
        let settings = Arc::new(self.config.settings.clone());
        let backend = match self.backend {
            Some(backend) => backend,
            None => create_backend(&self.default_adapter, &self.config)?,
        };
        let working_dir = self.working_dir.unwrap_or_else(|| PathBuf::from("."));
        let gate = PermissionGate::new(settings.permissions.clone());

        let search = self
            .search
            .unwrap_or_else(|| Arc::new(BraveSearch::from_settings(&settings.search)));
        let skills = self.skills.unwrap_or_else(|| {
            let root = settings
                .skills_dir
                .clone()
                .unwrap_or_else(|| working_dir.join("skills"));
            Arc::new(DirectorySkillStore::new(root))
        });
        let mut local = builtin_tools(search, settings.search.max_results, skills);
        local.extend(self.tools);

        // sub-agents see the local tools only, with the overrides that name them
        let local_names: HashSet<String> = local.iter().map(|t| t.name().to_string()).collect();
        let local_overrides: HashMap<String, PermissionLevel> = settings
            .permissions
            .overrides
            .iter()
            .filter(|(name, _)| local_names.contains(*name))
            .map(|(name, level)| (name.clone(), *level))
            .collect();
        let base = ToolRegistry::builder()
            .tools(local.iter().cloned())
            .overrides(local_overrides)
            .build()?;
        let orchestrator =
            SubAgentOrchestrator::new(backend.clone(), base, gate.clone(), settings.clone());

        let registry = ToolRegistry::builder()
            .tools(local)
            .tool(ask_user_tool(gate.clone()))
            .tools(sub_agent_tools(orchestrator.clone()))
            .overrides(settings.permissions.overrides.clone())
            .build()?;
        let sweeper = gate.start_sweeper();
        info!(adapter = %backend.adapter.id(), tools = registry.len(), "runtime ready");

        let backends = HashMap::from([(backend.adapter.id().to_string(), backend)]);
        Ok(AgentRuntime {
            config: self.config,
            settings,
            gate,
            registry,
            orchestrator,
            backends: Mutex::new(backends),
            sessions: SessionTable::default(),
            working_dir,
            sweeper,
        })
    }
}

/// Owns the shared state of every conversation: backends, the tool registry,
/// the permission gate and the sub-agent table.
pub struct AgentRuntime {
    config: ConductorConfig,
    settings: Arc<RuntimeSettings>,
    gate: PermissionGate,
    registry: ToolRegistry,
    orchestrator: SubAgentOrchestrator,
    backends: Mutex<HashMap<String, Backend>>,
    sessions: SessionTable,
    working_dir: PathBuf,
    sweeper: JoinHandle<()>,
}

impl AgentRuntime {
    pub fn builder(config: ConductorConfig) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder {
            config,
            default_adapter: DEFAULT_ADAPTER.to_string(),
            backend: None,
            tools: Vec::new(),
            search: None,
            skills: None,
            working_dir: None,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    /// Make `backend` available under its adapter id.
    pub fn register_backend(&self, backend: Backend) {
        self.backends()
            .insert(backend.adapter.id().to_string(), backend);
    }

    /// Start a turn on its own task.
    ///
    /// The transcript is owned by the turn until the result comes back.
    pub fn run_turn(
        &self,
        transcript: Vec<CanonicalMessage>,
        adapter_id: &str,
        tool_set: ToolSet,
        options: TurnOptions,
    ) -> Result<TurnHandle> {
        for (index, message) in transcript.iter().enumerate() {
            message.validate().map_err(|err| {
                ConductorError::InvalidArgument(format!("transcript message {index}: {err}"))
            })?;
        }
        let backend = self.backend(adapter_id)?;
        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(|| format!("session_{}", Uuid::new_v4().simple()));
        let options = TurnOptions {
            session_id: Some(session_id.clone()),
            working_dir: Some(
                options
                    .working_dir
                    .clone()
                    .unwrap_or_else(|| self.working_dir.clone()),
            ),
            ..options
        };
        let registry = match &tool_set {
            ToolSet::All => self.registry.clone(),
            set => self.registry.subset(|name| set.includes(name)),
        };
        let runner = AgentRunner::new(
            backend,
            ToolEngine::new(registry),
            self.gate.clone(),
            self.settings.clone(),
        );
        let (cancel, epoch) = self.sessions.enter(&session_id);
        let (events, rx) = EventEmitter::channel(session_id.clone());
        info!(session_id = %session_id, adapter = adapter_id, ?tool_set, "starting turn");

        let turn_cancel = cancel.clone();
        let sessions = self.sessions.clone();
        let orchestrator = self.orchestrator.clone();
        let scope = session_id.clone();
        let task = tokio::spawn(async move {
            let result = runner.run(transcript, options, events, turn_cancel).await;
            if sessions.leave(&scope, epoch) {
                orchestrator.prune(&scope);
            }
            result
        });
        Ok(TurnHandle {
            session_id,
            events: UnboundedReceiverStream::new(rx),
            cancel,
            task,
        })
    }

    /// First decision wins; later calls return false.
    pub fn resolve_permission(&self, request_id: &str, approved: bool) -> bool {
        self.gate.resolve(request_id, approved)
    }

    pub fn answer_question(&self, request_id: &str, answer: impl Into<String>) -> bool {
        self.gate.answer(request_id, answer)
    }

    pub fn pending_requests(&self) -> Vec<PermissionRequest> {
        self.gate.pending()
    }

    pub fn spawn_sub_agent(
        &self,
        task_type: SubAgentType,
        prompt: impl Into<String>,
        max_turns: Option<usize>,
        scope: &str,
    ) -> String {
        self.orchestrator.spawn(
            SpawnRequest::builder()
                .task_type(task_type)
                .prompt(prompt)
                .maybe_max_turns(max_turns)
                .scope(scope)
                .working_dir(self.working_dir.clone())
                .events(EventEmitter::noop(scope))
                .build(),
        )
    }

    /// Blocks up to the configured await timeout. Once no turn in `scope` is
    /// running, the returned tasks are forgotten.
    pub async fn await_sub_agents(&self, scope: &str) -> Vec<SubAgentTask> {
        let tasks = self.orchestrator.await_all(scope, None).await;
        if !self.sessions.is_active(scope) {
            self.orchestrator.prune(scope);
        }
        tasks
    }

    pub fn sub_agent(&self, task_id: &str) -> Option<SubAgentTask> {
        self.orchestrator.get(task_id)
    }

    /// Sessions with at least one turn in flight.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Cancel every turn and sub-agent in `scope`. Returns the number of
    /// sub-agents that were still running.
    pub fn cancel_session(&self, scope: &str) -> usize {
        self.sessions.cancel(scope);
        let cancelled = self.orchestrator.cancel_scope(scope);
        info!(scope, sub_agents = cancelled, "cancelled session");
        cancelled
    }

    fn backend(&self, adapter_id: &str) -> Result<Backend> {
        if let Some(backend) = self.backends().get(adapter_id) {
            return Ok(backend.clone());
        }
        let backend = create_backend(adapter_id, &self.config).map_err(|err| {
            warn!(adapter = adapter_id, error = %err, "cannot create backend");
            err
        })?;
        self.backends()
            .insert(adapter_id.to_string(), backend.clone());
        Ok(backend)
    }

    fn backends(&self) -> MutexGuard<'_, HashMap<String, Backend>> {
        self.backends
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Session {
    token: CancellationToken,
    turns: usize,
    /// Distinguishes a session recreated after `cancel` from the one a
    /// finishing turn entered.
    epoch: Uuid,
}

/// Cancellation scopes of the sessions that have a turn in flight.
#[derive(Clone, Default)]
struct SessionTable {
    inner: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionTable {
    /// Register a turn; returns its cancel token and the session epoch.
    fn enter(&self, scope: &str) -> (CancellationToken, Uuid) {
        let mut sessions = self.lock();
        let session = sessions.entry(scope.to_string()).or_insert_with(|| Session {
            token: CancellationToken::new(),
            turns: 0,
            epoch: Uuid::new_v4(),
        });
        session.turns += 1;
        (session.token.child_token(), session.epoch)
    }

    /// Returns true when this was the session's last turn.
    fn leave(&self, scope: &str, epoch: Uuid) -> bool {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(scope) else {
            return false;
        };
        if session.epoch != epoch {
            return false;
        }
        session.turns = session.turns.saturating_sub(1);
        if session.turns > 0 {
            return false;
        }
        sessions.remove(scope);
        true
    }

    fn cancel(&self, scope: &str) {
        if let Some(session) = self.lock().remove(scope) {
            session.token.cancel();
        }
    }

    fn is_active(&self, scope: &str) -> bool {
        self.lock().contains_key(scope)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for AgentRuntime {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("tools", &self.registry.names())
            .field("working_dir", &self.working_dir)
            .finish()
    }
}
