//! Pipeline run history

use crate::core::{ExecutionStatus, Pipeline, StepState};
use crate::persistence::{load_json, update_json, StateStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Key of the run history in the state store
pub const HISTORY_KEY: &str = "pipeline-runs.json";

/// Most runs kept in the history file
const MAX_RUNS: usize = 100;

/// Summary of one step in a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Summary of a finished pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub pipeline_name: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub steps: Vec<StepSummary>,
}

impl ExecutionSummary {
    /// Wall-clock duration of the run, if it finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Build a summary from a pipeline after it ran
pub fn create_summary(pipeline: &Pipeline) -> ExecutionSummary {
    let steps = pipeline
        .execution_order()
        .filter_map(|id| pipeline.step(id))
        .map(|step| {
            let (attempts, detail) = match &step.state {
                StepState::Completed { attempts, .. } => (*attempts, None),
                StepState::Failed { attempts, error, .. } => (*attempts, Some(error.clone())),
                StepState::Skipped { reason } => (0, Some(reason.to_string())),
                StepState::Running { attempt, .. } => (*attempt, None),
                StepState::Pending => (0, None),
            };
            StepSummary {
                id: step.id.clone(),
                status: step.state.label().to_string(),
                attempts,
                detail,
            }
        })
        .collect();

    let state = &pipeline.state;
    ExecutionSummary {
        execution_id: state.execution_id,
        pipeline_name: pipeline.name.clone(),
        status: state.status,
        started_at: state.started_at,
        completed_at: state.completed_at,
        total_steps: state.total_steps,
        completed_steps: state.completed_steps,
        failed_steps: state.failed_steps,
        skipped_steps: state.skipped_steps,
        steps,
    }
}

/// Persistent list of pipeline runs, oldest first on disk
#[derive(Clone)]
pub struct PipelineHistory {
    store: Arc<dyn StateStore>,
}

impl PipelineHistory {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Append a run, dropping the oldest beyond the retention cap
    pub fn record(&self, summary: &ExecutionSummary) -> Result<(), StoreError> {
        update_json(self.store.as_ref(), HISTORY_KEY, |runs: &mut Vec<ExecutionSummary>| {
            runs.retain(|r| r.execution_id != summary.execution_id);
            runs.push(summary.clone());
            if runs.len() > MAX_RUNS {
                let excess = runs.len() - MAX_RUNS;
                runs.drain(..excess);
            }
        })?;
        Ok(())
    }

    /// Runs, newest first, optionally limited to one pipeline
    pub fn list(&self, pipeline: Option<&str>, limit: usize) -> Result<Vec<ExecutionSummary>, StoreError> {
        let runs: Vec<ExecutionSummary> = load_json(self.store.as_ref(), HISTORY_KEY)?.unwrap_or_default();
        Ok(runs
            .into_iter()
            .rev()
            .filter(|run| pipeline.map_or(true, |name| run.pipeline_name == name))
            .take(limit)
            .collect())
    }
}
