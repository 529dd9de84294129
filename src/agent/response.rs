//! Agent outcome and error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error message reported when an invocation exceeds its timeout
pub const TIMEOUT_ERROR: &str = "timeout";

/// Error types for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// The caller broke the task contract (missing required fields)
    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Timeout after {0} ms")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Raw result of one backend invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutput {
    /// Final output text
    pub output: String,

    /// Process exit code, if the backend is a process
    pub exit_code: Option<i32>,

    /// Diagnostic text (stderr) for failed invocations
    pub error: Option<String>,
}

impl AgentOutput {
    /// Successful output with no exit code
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code: None,
            error: None,
        }
    }

    /// Whether the invocation counts as a success
    pub fn succeeded(&self) -> bool {
        self.exit_code.map_or(true, |code| code == 0)
    }
}

/// Outcome of [`AgentExecutor::execute`](crate::agent::AgentExecutor::execute)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutcome {
    pub success: bool,

    pub output: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl AgentOutcome {
    /// Successful outcome
    pub fn success(output: String, exit_code: Option<i32>) -> Self {
        Self {
            success: true,
            output,
            error: None,
            exit_code,
        }
    }

    /// Failed outcome carrying an error message
    pub fn failure(error: impl Into<String>, output: String, exit_code: Option<i32>) -> Self {
        Self {
            success: false,
            output,
            error: Some(error.into()),
            exit_code,
        }
    }

    /// Outcome of an invocation cut off by its timeout
    pub fn timed_out() -> Self {
        Self::failure(TIMEOUT_ERROR, String::new(), None)
    }

    /// Whether this outcome is a timeout
    pub fn is_timeout(&self) -> bool {
        !self.success && self.error.as_deref() == Some(TIMEOUT_ERROR)
    }
}
