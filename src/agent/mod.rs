//! Agent execution: one named agent against one task
//!
//! [`AgentExecutor`] resolves the agent's contract from an [`AgentCatalog`],
//! invokes it through an [`AgentBackend`] and enforces a wall-clock timeout
//! measured from the start of the call.

pub mod backend;
pub mod catalog;
pub mod protocol;
pub mod response;
pub mod streaming;

pub use backend::{AgentBackend, SubprocessBackend};
pub use catalog::{AgentCatalog, AgentDefinition, DirectoryCatalog, InMemoryCatalog};
pub use response::{AgentError, AgentOutcome, AgentOutput};
pub use streaming::{event_channel, AgentEvent, EventSink};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A unit of agent work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTask {
    /// Caller-chosen identifier (execution id, step id)
    pub id: String,
    /// Agent name
    pub agent: String,
    /// Task description
    pub task: String,
}

impl AgentTask {
    pub fn new(id: impl Into<String>, agent: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            task: task.into(),
        }
    }
}

/// Options for one execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Wall-clock limit from invocation start
    pub timeout: Duration,
    /// Receives progress and log events
    pub events: Option<mpsc::Sender<AgentEvent>>,
}

impl ExecuteOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            events: None,
        }
    }

    pub fn events(mut self, sender: mpsc::Sender<AgentEvent>) -> Self {
        self.events = Some(sender);
        self
    }
}

/// Runs agents with timeout enforcement and event streaming
#[derive(Clone)]
pub struct AgentExecutor {
    catalog: Arc<dyn AgentCatalog>,
    backend: Arc<dyn AgentBackend>,
}

impl std::fmt::Debug for AgentExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentExecutor").finish_non_exhaustive()
    }
}

impl AgentExecutor {
    pub fn new(catalog: Arc<dyn AgentCatalog>, backend: Arc<dyn AgentBackend>) -> Self {
        Self { catalog, backend }
    }

    /// The catalog agents are resolved from
    pub fn catalog(&self) -> &dyn AgentCatalog {
        self.catalog.as_ref()
    }

    /// Whether an agent with this name exists
    pub fn has_agent(&self, name: &str) -> bool {
        matches!(self.catalog.resolve(name), Ok(Some(_)))
    }

    /// Execute a task
    ///
    /// Only contract violations (empty id, agent or task) are returned as
    /// errors. Unknown agents, failing agents and timeouts produce an
    /// unsuccessful [`AgentOutcome`]; a timeout reports the error `"timeout"`.
    pub async fn execute(
        &self,
        task: &AgentTask,
        env: &HashMap<String, String>,
        options: ExecuteOptions,
    ) -> Result<AgentOutcome, AgentError> {
        for (field, value) in [("id", &task.id), ("agent", &task.agent), ("task", &task.task)] {
            if value.trim().is_empty() {
                return Err(AgentError::Contract(format!(
                    "task field '{}' is required",
                    field
                )));
            }
        }

        let definition = match self.catalog.resolve(&task.agent) {
            Ok(Some(definition)) => definition,
            Ok(None) => {
                warn!(task_id = %task.id, agent = %task.agent, "Unknown agent");
                return Ok(AgentOutcome::failure(
                    format!("unknown agent '{}'", task.agent),
                    String::new(),
                    None,
                ));
            }
            Err(e) => return Ok(AgentOutcome::failure(e.to_string(), String::new(), None)),
        };

        info!(task_id = %task.id, agent = %task.agent, "Executing agent task");
        let started = Instant::now();
        let events = EventSink::new(options.events);

        let invocation = self.backend.invoke(&definition, &task.task, env, &events);
        let outcome = match tokio::time::timeout(options.timeout, invocation).await {
            Err(_) => {
                warn!(
                    task_id = %task.id,
                    agent = %task.agent,
                    timeout_ms = options.timeout.as_millis() as u64,
                    "Agent task timed out"
                );
                AgentOutcome::timed_out()
            }
            Ok(Err(AgentError::Contract(message))) => return Err(AgentError::Contract(message)),
            Ok(Err(e)) => AgentOutcome::failure(e.to_string(), String::new(), None),
            Ok(Ok(output)) if output.succeeded() => {
                events.progress(100).await;
                AgentOutcome::success(output.output, output.exit_code)
            }
            Ok(Ok(output)) => {
                let error = output
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string());
                AgentOutcome::failure(error, output.output, output.exit_code)
            }
        };

        debug!(
            task_id = %task.id,
            success = outcome.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Agent task finished"
        );
        Ok(outcome)
    }
}
