//! Pipeline context - shared variables and step outcomes

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Recorded result of a finished step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Status label (`completed`, `failed`, `skipped`)
    pub status: String,
    /// Agent output, or the error for failed steps
    pub output: String,
}

/// Execution context for a pipeline run
///
/// The outcome map is append-only: once a step has recorded its outcome, no
/// later write can replace it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineContext {
    /// Global and user-defined variables
    pub variables: BTreeMap<String, String>,

    /// Outcomes of finished steps (step_id -> outcome)
    step_outputs: BTreeMap<String, StepOutcome>,
}

impl PipelineContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded with variables
    pub fn with_variables(variables: BTreeMap<String, String>) -> Self {
        Self {
            variables,
            step_outputs: BTreeMap::new(),
        }
    }

    /// Set a variable
    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Record a step's outcome; returns false if one was already recorded
    pub fn record_outcome(&mut self, step_id: &str, status: &str, output: &str) -> bool {
        if self.step_outputs.contains_key(step_id) {
            return false;
        }
        self.step_outputs.insert(
            step_id.to_string(),
            StepOutcome {
                status: status.to_string(),
                output: output.to_string(),
            },
        );
        true
    }

    /// Recorded outcome of a step
    pub fn outcome(&self, step_id: &str) -> Option<&StepOutcome> {
        self.step_outputs.get(step_id)
    }

    /// Output of a step, if it has one
    pub fn get_step_output(&self, step_id: &str) -> Option<&str> {
        self.step_outputs.get(step_id).map(|o| o.output.as_str())
    }

    /// All recorded outcomes
    pub fn outcomes(&self) -> &BTreeMap<String, StepOutcome> {
        &self.step_outputs
    }

    /// Get all variables available for input rendering
    pub fn get_rendering_variables(&self) -> HashMap<String, String> {
        let mut vars: HashMap<String, String> = self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (step_id, outcome) in &self.step_outputs {
            vars.insert(format!("steps.{}.output", step_id), outcome.output.clone());
            vars.insert(format!("steps.{}.status", step_id), outcome.status.clone());
        }

        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_append_only() {
        let mut context = PipelineContext::new();

        assert!(context.record_outcome("build", "completed", "artifact.tar"));
        assert!(!context.record_outcome("build", "failed", "overwritten"));
        assert_eq!(context.get_step_output("build"), Some("artifact.tar"));
    }

    #[test]
    fn test_rendering_variables() {
        let mut context = PipelineContext::new();
        context.set_variable("feature", "search");
        context.record_outcome("build", "completed", "ok");

        let vars = context.get_rendering_variables();
        assert_eq!(vars.get("feature"), Some(&"search".to_string()));
        assert_eq!(vars.get("steps.build.output"), Some(&"ok".to_string()));
        assert_eq!(vars.get("steps.build.status"), Some(&"completed".to_string()));
    }
}
