//! CI adapters - serialize a pipeline into a CI platform's workflow file
//!
//! Every step becomes one CI job that runs `agentful trigger <agent> '<input>'`.
//! Adapters only translate the dependency graph and failure policy; the
//! agents themselves still run through the CLI on the CI runner.

pub mod github;
pub mod gitlab;
pub mod jenkins;

pub use github::GithubActionsAdapter;
pub use gitlab::GitlabAdapter;
pub use jenkins::JenkinsAdapter;

use crate::core::{PipelineDefinition, PipelineError, StepDefinition};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Command CI jobs use to run a step
pub const TRIGGER_COMMAND: &str = "agentful trigger";

/// Error types for workflow generation
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("No adapter registered for {0}")]
    UnknownPlatform(Platform),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Failed to render workflow: {0}")]
    Render(String),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Supported CI platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Platform {
    #[value(name = "github-actions", alias = "github")]
    GithubActions,
    #[value(name = "gitlab")]
    Gitlab,
    #[value(name = "jenkins")]
    Jenkins,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::GithubActions => "github-actions",
            Platform::Gitlab => "gitlab",
            Platform::Jenkins => "jenkins",
        })
    }
}

/// Turns a pipeline definition into one platform's workflow file
pub trait WorkflowAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Path of the workflow file relative to the project root
    fn default_output_path(&self, definition: &PipelineDefinition) -> PathBuf;

    /// Render the workflow file contents
    fn render(&self, definition: &PipelineDefinition) -> Result<String, AdapterError>;
}

/// Adapters by platform
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Box<dyn WorkflowAdapter>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(GithubActionsAdapter));
        registry.register(Box::new(GitlabAdapter));
        registry.register(Box::new(JenkinsAdapter));
        registry
    }
}

impl AdapterRegistry {
    /// Registry with the built-in adapters
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Add an adapter, replacing any adapter for the same platform
    pub fn register(&mut self, adapter: Box<dyn WorkflowAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Result<&dyn WorkflowAdapter, AdapterError> {
        self.adapters
            .get(&platform)
            .map(|a| a.as_ref())
            .ok_or(AdapterError::UnknownPlatform(platform))
    }

    /// Render `definition` for `platform` and write it
    ///
    /// Without `output` the platform's default path under `project_root` is
    /// used. Returns the written path.
    pub fn deploy(
        &self,
        platform: Platform,
        definition: &PipelineDefinition,
        project_root: &Path,
        output: Option<&Path>,
    ) -> Result<PathBuf, AdapterError> {
        let adapter = self.get(platform)?;
        let content = adapter.render(definition)?;
        let path = match output {
            Some(path) => path.to_path_buf(),
            None => project_root.join(adapter.default_output_path(definition)),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| AdapterError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, content).map_err(|source| AdapterError::Io {
            path: path.clone(),
            source,
        })?;

        info!(platform = %platform, path = %path.display(), "Wrote workflow");
        Ok(path)
    }
}

/// Quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell command running one step
pub fn trigger_command(step: &StepDefinition) -> String {
    format!(
        "{} {} {}",
        TRIGGER_COMMAND,
        shell_quote(&step.agent),
        shell_quote(step.input.trim())
    )
}

/// CI-safe job identifier for a step id
pub fn job_id(step_id: &str) -> String {
    let mut id: String = step_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if !id.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        id.insert(0, '_');
    }
    id
}

/// Job identifiers keyed by step id
///
/// Fails when two step ids map to the same job, e.g. `build.web` and `build_web`.
pub fn job_ids(definition: &PipelineDefinition) -> Result<HashMap<String, String>, AdapterError> {
    let mut ids = HashMap::new();
    let mut owners: HashMap<String, &str> = HashMap::new();
    for step in &definition.steps {
        let id = job_id(&step.id);
        if let Some(other) = owners.insert(id.clone(), &step.id) {
            return Err(AdapterError::Render(format!(
                "steps '{}' and '{}' both map to job '{}'",
                other, step.id, id
            )));
        }
        ids.insert(step.id.clone(), id);
    }
    Ok(ids)
}

/// Steps whose condition the CI platform cannot evaluate
///
/// These jobs always run; each one is reported with a warning.
pub fn conditional_steps(platform: Platform, definition: &PipelineDefinition) -> Vec<&str> {
    definition
        .steps
        .iter()
        .filter(|s| s.condition.is_some())
        .map(|s| {
            warn!(platform = %platform, step_id = %s.id, "Step condition is not evaluated in CI; the job always runs");
            s.id.as_str()
        })
        .collect()
}

/// Step timeout in whole minutes, if any
pub fn timeout_minutes(step: &StepDefinition, definition: &PipelineDefinition) -> Option<u64> {
    step.timeout
        .or(definition.defaults.timeout)
        .map(|secs| secs.div_ceil(60).max(1))
}

/// File-name friendly form of the pipeline name
pub fn slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "pipeline".to_string()
    } else {
        slug.to_string()
    }
}
