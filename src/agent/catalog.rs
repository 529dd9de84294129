//! Agent catalog - behavioral contracts from the template layer
//!
//! Agents are markdown files `<project>/.claude/agents/<name>.md`, optionally
//! starting with a YAML front matter block:
//!
//! ```text
//! ---
//! name: backend
//! description: Implements server-side changes
//! ---
//! You are the backend agent...
//! ```
//!
//! The body after the front matter is the agent's contract.

use crate::agent::AgentError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A resolved agent definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDefinition {
    pub name: String,
    pub description: Option<String>,
    pub contract: String,
}

/// Source of agent definitions
///
/// Implementations must tolerate concurrent reads.
pub trait AgentCatalog: Send + Sync {
    /// Names of all known agents, sorted
    fn list(&self) -> Result<Vec<String>, AgentError>;

    /// Look up one agent
    fn resolve(&self, name: &str) -> Result<Option<AgentDefinition>, AgentError>;
}

/// Whether `name` is acceptable as an agent name
pub fn is_valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    description: Option<String>,
}

/// Parse a markdown agent file
pub fn parse_agent_markdown(file_stem: &str, content: &str) -> AgentDefinition {
    let (front, body) = split_front_matter(content);
    let meta: FrontMatter = front
        .and_then(|yaml| match serde_yaml::from_str(yaml) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(agent = %file_stem, "Ignoring malformed front matter: {}", e);
                None
            }
        })
        .unwrap_or_default();

    AgentDefinition {
        name: file_stem.to_string(),
        description: meta.description,
        contract: body.trim().to_string(),
    }
}

fn split_front_matter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix("---") else {
        return (None, content);
    };
    let rest = rest.trim_start_matches(['\r', ' ']);
    let Some(rest) = rest.strip_prefix('\n') else {
        return (None, content);
    };
    match rest.find("\n---") {
        Some(end) => {
            let yaml = &rest[..end];
            let after = &rest[end + 4..];
            let body = after.split_once('\n').map(|(_, b)| b).unwrap_or("");
            (Some(yaml), body)
        }
        None => (None, content),
    }
}

/// Catalog backed by a directory of markdown files
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    dir: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Standard `.claude/agents` directory of a project
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(".claude").join("agents"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AgentCatalog for DirectoryCatalog {
    fn list(&self) -> Result<Vec<String>, AgentError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AgentError::Internal(format!(
                    "Failed to read agents directory {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|e| e == "md").unwrap_or(false))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .filter(|name| is_valid_agent_name(name))
            .collect();
        names.sort();
        Ok(names)
    }

    fn resolve(&self, name: &str) -> Result<Option<AgentDefinition>, AgentError> {
        if !is_valid_agent_name(name) {
            return Ok(None);
        }

        let path = self.dir.join(format!("{}.md", name));
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                debug!(agent = %name, path = %path.display(), "Resolved agent definition");
                Ok(Some(parse_agent_markdown(name, &content)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::Internal(format!(
                "Failed to read agent {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Fixed set of agents (tests and embedding)
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    agents: BTreeMap<String, AgentDefinition>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent with the given contract
    pub fn with_agent(mut self, name: &str, contract: &str) -> Self {
        self.agents.insert(
            name.to_string(),
            AgentDefinition {
                name: name.to_string(),
                description: None,
                contract: contract.to_string(),
            },
        );
        self
    }
}

impl AgentCatalog for InMemoryCatalog {
    fn list(&self) -> Result<Vec<String>, AgentError> {
        Ok(self.agents.keys().cloned().collect())
    }

    fn resolve(&self, name: &str) -> Result<Option<AgentDefinition>, AgentError> {
        Ok(self.agents.get(name).cloned())
    }
}
