//! Run and step state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Status of a whole pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    /// At least one non-optional step failed
    Failed,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a step was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SkipReason {
    /// The step's condition evaluated to false
    ConditionNotMet,
    /// A dependency failed or was itself skipped because of a failure
    UpstreamFailed { step: String },
}

impl SkipReason {
    /// Whether this skip propagates to dependents
    pub fn is_failure(&self) -> bool {
        matches!(self, SkipReason::UpstreamFailed { .. })
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ConditionNotMet => f.write_str("condition not met"),
            SkipReason::UpstreamFailed { step } => write!(f, "dependency '{}' failed", step),
        }
    }
}

/// Lifecycle of one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    /// Waiting on dependencies
    Pending,
    Running {
        started_at: DateTime<Utc>,
        attempt: u32,
    },
    Completed {
        output: String,
        attempts: u32,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Every attempt failed
    Failed {
        error: String,
        attempts: u32,
        last_started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step was not run
    Skipped { reason: SkipReason },
}

impl StepState {
    /// Completed, failed or skipped
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed { .. } | StepState::Failed { .. } | StepState::Skipped { .. }
        )
    }

    /// Whether dependents without `run_on_failure` must be skipped
    pub fn blocks_dependents(&self) -> bool {
        match self {
            StepState::Failed { .. } => true,
            StepState::Skipped { reason } => reason.is_failure(),
            _ => false,
        }
    }

    /// Short lowercase label
    pub fn label(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Running { .. } => "running",
            StepState::Completed { .. } => "completed",
            StepState::Failed { .. } => "failed",
            StepState::Skipped { .. } => "skipped",
        }
    }
}

/// Run-level bookkeeping, refreshed after every step transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    /// Set once the run reaches its final status
    pub completed_at: Option<DateTime<Utc>>,

    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_steps: 0,
            completed_steps: 0,
            failed_steps: 0,
            skipped_steps: 0,
        }
    }
}

impl PipelineState {
    /// Fresh state with a new execution id
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, total_steps: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_steps = total_steps;
    }

    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Steps that reached a terminal state
    pub fn finished_steps(&self) -> usize {
        self.completed_steps + self.failed_steps + self.skipped_steps
    }
}
