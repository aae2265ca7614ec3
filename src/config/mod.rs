//! Configuration system (layered: code > env > config file > defaults).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, Result};
use crate::types::PermissionLevel;
use crate::util::retry::RetryPolicy;

/// Global default config (lazy-initialized from env).
static DEFAULT_CONFIG: OnceLock<ConductorConfig> = OnceLock::new();

const CONFIG_ENV_VAR: &str = "CONDUCTOR_CONFIG";

/// Layered configuration for conductor.
///
/// Credentials and endpoints live in shared maps so a config can be cloned
/// into spawned loops and still see later `set_*` calls. Runtime tunables live
/// in [`RuntimeSettings`], read once from the config file.
#[derive(Clone)]
pub struct ConductorConfig {
    api_keys: Arc<RwLock<HashMap<String, String>>>,
    base_urls: Arc<RwLock<HashMap<String, String>>>,
    pub settings: RuntimeSettings,
}

impl fmt::Debug for ConductorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<String> = self
            .api_keys
            .read()
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("ConductorConfig")
            .field("api_keys", &providers)
            .field("base_urls", &self.base_urls)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConductorConfig {
    /// Create an empty config with default settings.
    pub fn new() -> Self {
        Self {
            api_keys: Arc::new(RwLock::new(HashMap::new())),
            base_urls: Arc::new(RwLock::new(HashMap::new())),
            settings: RuntimeSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Load from environment variables and the config file, if any.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        let settings = match settings_path() {
            Some(path) if path.exists() => RuntimeSettings::load(&path)?,
            _ => RuntimeSettings::default(),
        };
        let mut config = Self::new().with_settings(settings);

        for (env_var, provider) in [
            ("ANTHROPIC_API_KEY", "anthropic"),
            ("OPENAI_API_KEY", "openai"),
        ] {
            if let Ok(key) = std::env::var(env_var) {
                config.set_api_key(provider, key);
            }
        }
        for (env_var, provider) in [
            ("ANTHROPIC_BASE_URL", "anthropic"),
            ("OPENAI_BASE_URL", "openai"),
        ] {
            if let Ok(url) = std::env::var(env_var) {
                config.set_base_url(provider, url);
            }
        }

        if let Ok(key) = std::env::var("BRAVE_API_KEY") {
            config.settings.search.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("CONDUCTOR_SEARCH_URL") {
            config.settings.search.endpoint = url;
        }

        Ok(config)
    }

    /// Get (or create) the global default config. Falls back to defaults when
    /// the config file cannot be parsed.
    pub fn global() -> &'static ConductorConfig {
        DEFAULT_CONFIG.get_or_init(|| {
            Self::from_env().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "ignoring unreadable config file");
                Self::new()
            })
        })
    }

    pub fn set_api_key(&self, provider: &str, key: String) {
        if let Ok(mut keys) = self.api_keys.write() {
            keys.insert(provider.to_string(), key);
        }
    }

    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        self.api_keys.read().ok()?.get(provider).cloned()
    }

    pub fn set_base_url(&self, provider: &str, url: String) {
        if let Ok(mut urls) = self.base_urls.write() {
            urls.insert(provider.to_string(), url);
        }
    }

    pub fn get_base_url(&self, provider: &str) -> Option<String> {
        self.base_urls.read().ok()?.get(provider).cloned()
    }

    pub fn has_credentials(&self, provider: &str) -> bool {
        self.get_api_key(provider).is_some()
    }
}

/// Resolve the config file location: `$CONDUCTOR_CONFIG`, else the platform
/// config dir.
pub fn settings_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    directories::ProjectDirs::from("dev", "conductor", "conductor")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Runtime tunables, deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeSettings {
    pub agent: AgentSettings,
    pub permissions: PermissionSettings,
    pub compaction: CompactionSettings,
    pub retry: RetrySettings,
    pub subagents: SubAgentSettings,
    pub tools: ToolSettings,
    pub search: SearchSettings,
    pub openai: OpenAiSettings,
    /// Extra model aliases per adapter id.
    pub aliases: HashMap<String, HashMap<String, String>>,
    /// Root directory of on-demand skills.
    pub skills_dir: Option<PathBuf>,
}

impl RuntimeSettings {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ConductorError::Configuration(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    /// Hard ceiling on model calls per turn.
    pub max_iterations: usize,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub stream: bool,
    /// Model alias or id; each adapter has its own default when unset.
    pub model: Option<String>,
    /// Longest wait for the next chunk of a streamed response.
    pub stream_idle_timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_tokens: 4096,
            temperature: None,
            stream: true,
            model: None,
            stream_idle_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PermissionSettings {
    pub timeout_secs: u64,
    /// Age at which the sweeper evicts a pending request.
    pub expiry_secs: u64,
    pub sweep_interval_secs: u64,
    /// Per-tool permission level overrides, applied when the registry is built.
    pub overrides: HashMap<String, PermissionLevel>,
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            expiry_secs: 600,
            sweep_interval_secs: 30,
            overrides: HashMap::new(),
        }
    }
}

impl PermissionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompactionSettings {
    /// Transcript length that triggers compaction.
    pub max_messages: usize,
    /// Units (tool pairs or single messages) kept verbatim.
    pub keep_recent: usize,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            max_messages: 40,
            keep_recent: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubAgentSettings {
    pub poll_interval_ms: u64,
    pub await_timeout_secs: u64,
    pub default_max_turns: usize,
}

impl Default for SubAgentSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            await_timeout_secs: 300,
            default_max_turns: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolSettings {
    pub bash_timeout_secs: u64,
    pub output_max_bytes: usize,
    pub read_max_bytes: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            bash_timeout_secs: 120,
            output_max_bytes: 32_768,
            read_max_bytes: 262_144,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_results: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.search.brave.com/res/v1/web/search".to_string(),
            api_key: None,
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OpenAiSettings {
    /// Send tool schemas in strict mode (every property required, nullable
    /// where optional).
    pub strict_tools: bool,
}
