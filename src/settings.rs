//! Project settings from `.agentful/config.yaml` plus environment overrides

use crate::agent::{backend, AgentExecutor, DirectoryCatalog, SubprocessBackend};
use crate::protocol::{AuthMode, DEFAULT_PORT};
use crate::server::ServerConfig;
use crate::worktree::WorktreeConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Settings file, relative to the project's `.agentful` directory
pub const SETTINGS_FILE: &str = "config.yaml";

pub const ENV_SECRET: &str = "AGENTFUL_SECRET";
pub const ENV_WORKTREE_DIR: &str = "AGENTFUL_WORKTREE_DIR";
pub const ENV_AGENT_COMMAND: &str = "AGENTFUL_AGENT_COMMAND";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings in {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub agent: AgentSettings,
    pub server: ServerSettings,
    pub worktrees: WorktreeSettings,
}

/// How agents are invoked
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub command: String,
    pub args: Vec<String>,
    /// Agent definitions directory (default `.claude/agents`)
    pub agents_dir: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            command: backend::DEFAULT_AGENT_COMMAND.to_string(),
            args: backend::default_args(),
            agents_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub auth: AuthMode,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Seconds
    pub default_timeout: u64,
    /// Seconds
    pub max_timeout: u64,
    /// Only ever read from the environment
    #[serde(skip)]
    pub secret: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            port: DEFAULT_PORT,
            auth: defaults.auth,
            workers: defaults.workers,
            queue_capacity: defaults.queue_capacity,
            default_timeout: defaults.default_timeout.as_secs(),
            max_timeout: defaults.max_timeout.as_secs(),
            secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorktreeSettings {
    pub root: Option<PathBuf>,
    pub max_active: usize,
    pub retention_days: u32,
}

impl Default for WorktreeSettings {
    fn default() -> Self {
        Self {
            root: None,
            max_active: WorktreeConfig::DEFAULT_MAX_ACTIVE,
            retention_days: WorktreeConfig::DEFAULT_RETENTION_DAYS,
        }
    }
}

impl Settings {
    /// Load the project's settings and apply environment overrides
    ///
    /// A missing settings file yields the defaults.
    pub fn load(project_root: &Path) -> Result<Self, SettingsError> {
        let path = project_root.join(".agentful").join(SETTINGS_FILE);
        let mut settings = match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_yaml(&content).map_err(|message| SettingsError::Parse {
                path: path.clone(),
                message,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                Self::default()
            }
            Err(source) => return Err(SettingsError::Io { path, source }),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| e.to_string())
    }

    /// Apply `AGENTFUL_*` overrides looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(secret) = set(ENV_SECRET) {
            self.server.secret = Some(secret);
        }
        if let Some(dir) = set(ENV_WORKTREE_DIR) {
            self.worktrees.root = Some(PathBuf::from(dir));
        }
        if let Some(command) = set(ENV_AGENT_COMMAND) {
            self.agent.command = command;
        }
    }

    /// Executor using the project's agent definitions and configured command
    pub fn agent_executor(&self, project_root: &Path) -> AgentExecutor {
        let catalog = match &self.agent.agents_dir {
            Some(dir) => DirectoryCatalog::new(project_root.join(dir)),
            None => DirectoryCatalog::for_project(project_root),
        };
        let backend = SubprocessBackend::new(&self.agent.command, self.agent.args.clone())
            .with_working_dir(project_root);
        AgentExecutor::new(Arc::new(catalog), Arc::new(backend))
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.server.port,
            auth: self.server.auth,
            secret: self.server.secret.clone(),
            workers: self.server.workers,
            queue_capacity: self.server.queue_capacity,
            default_timeout: Duration::from_secs(self.server.default_timeout),
            max_timeout: Duration::from_secs(self.server.max_timeout),
        }
    }

    pub fn worktree_config(&self, project_root: &Path) -> WorktreeConfig {
        let root = match &self.worktrees.root {
            Some(root) => project_root.join(root),
            None => WorktreeConfig::default_root(project_root),
        };
        WorktreeConfig {
            root,
            max_active: self.worktrees.max_active,
            retention_days: self.worktrees.retention_days,
        }
    }
}
