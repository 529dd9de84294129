//! Step domain model

use crate::core::{
    condition::Condition,
    config::StepDefinition,
    error::PipelineError,
    state::StepState,
};
use std::collections::HashMap;
use std::time::Duration;

/// Default step timeout when neither the step nor the pipeline sets one
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Defaults inherited by every step
#[derive(Debug, Clone, Copy)]
pub struct StepDefaults {
    pub retries: u32,
    pub timeout_secs: u64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            retries: 0,
            timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
        }
    }
}

/// A single step in a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Agent invoked for this step
    pub agent: String,

    /// Input template for this step
    pub input_template: String,

    /// List of step IDs this step depends on
    pub dependencies: Vec<String>,

    /// Condition gating execution
    pub condition: Option<Condition>,

    /// Retries after the first attempt
    pub retries: u32,

    /// Timeout in seconds, per attempt
    pub timeout_secs: u64,

    /// Run even when a dependency failed
    pub run_on_failure: bool,

    /// Failure does not fail the pipeline
    pub optional: bool,

    /// Runtime state
    pub state: StepState,
}

impl Step {
    /// Create a step from its definition
    pub fn from_definition(
        definition: &StepDefinition,
        defaults: &StepDefaults,
    ) -> Result<Self, PipelineError> {
        let condition = definition
            .condition
            .as_ref()
            .map(Condition::compile)
            .transpose()?;

        Ok(Step {
            id: definition.id.clone(),
            name: definition.display_name().to_string(),
            agent: definition.agent.clone(),
            input_template: definition.input.clone(),
            dependencies: definition.depends_on.clone(),
            condition,
            retries: definition.retries.unwrap_or(defaults.retries),
            timeout_secs: definition.timeout.unwrap_or(defaults.timeout_secs),
            run_on_failure: definition.run_on_failure,
            optional: definition.optional,
            state: StepState::Pending,
        })
    }

    /// Wall-clock timeout of one attempt
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Render the input with variable substitution
    ///
    /// Placeholders are `{{ name }}`; surrounding whitespace inside the braces
    /// is optional. Unknown placeholders are left as written.
    pub fn render_input(&self, variables: &HashMap<String, String>) -> String {
        let template = &self.input_template;
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template.as_str();

        while let Some(start) = rest.find("{{") {
            rendered.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let key = after[..end].trim();
                    match variables.get(key) {
                        Some(value) => rendered.push_str(value),
                        None => rendered.push_str(&rest[start..start + 2 + end + 2]),
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    rendered.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        rendered.push_str(rest);

        rendered
    }
}
