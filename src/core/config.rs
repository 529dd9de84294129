//! Pipeline definition loaded from YAML or JSON

use crate::core::{condition::ConditionDefinition, error::PipelineError, pipeline::topological_levels, Pipeline};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Default maximum number of steps running at once
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Top-level pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Global variables available to all step inputs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,

    /// Defaults applied to steps that don't override them
    #[serde(default)]
    pub defaults: PipelineDefaults,

    /// Maximum number of steps executing concurrently
    #[serde(default, alias = "maxParallel", skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Pipeline steps
    pub steps: Vec<StepDefinition>,
}

/// Pipeline-wide step defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineDefaults {
    /// Timeout for steps (in seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Retries per step after the first attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// Step as written in the pipeline file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Agent that runs this step
    pub agent: String,

    /// Task input template for the agent
    #[serde(default)]
    pub input: String,

    /// List of step IDs this step depends on
    #[serde(default, alias = "dependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Predicate over upstream outputs gating this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionDefinition>,

    /// Timeout for this step in seconds (overrides defaults)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Retries for this step (overrides defaults)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Run even when a dependency failed
    #[serde(default, alias = "runOnFailure")]
    pub run_on_failure: bool,

    /// A failure of this step does not fail the pipeline
    #[serde(default)]
    pub optional: bool,
}

impl StepDefinition {
    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Load and validate a pipeline file
///
/// Files ending in `.json` are parsed as JSON, everything else as YAML.
pub fn load_pipeline<P: AsRef<Path>>(path: P) -> Result<PipelineDefinition, PipelineError> {
    PipelineDefinition::from_file(path)
}

impl PipelineDefinition {
    /// Load pipeline definition from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Parse pipeline definition from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, PipelineError> {
        let definition: PipelineDefinition =
            serde_yaml::from_str(yaml).map_err(|e| PipelineError::Parse(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Parse pipeline definition from JSON string
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let definition: PipelineDefinition =
            serde_json::from_str(json).map_err(|e| PipelineError::Parse(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Validate the pipeline definition
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(invalid("pipeline name must not be empty".to_string()));
        }
        if self.max_parallel == Some(0) {
            return Err(invalid("max_parallel must be at least 1".to_string()));
        }
        if self.defaults.timeout == Some(0) {
            return Err(invalid("default timeout must be greater than zero".to_string()));
        }

        // Check that all step IDs are unique
        let mut seen_ids = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(invalid("step id must not be empty".to_string()));
            }
            if !seen_ids.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }
        }

        for step in &self.steps {
            if step.agent.trim().is_empty() {
                return Err(invalid(format!("step '{}' has no agent", step.id)));
            }
            if step.timeout == Some(0) {
                return Err(invalid(format!(
                    "step '{}' timeout must be greater than zero",
                    step.id
                )));
            }
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(invalid(format!("step '{}' depends on itself", step.id)));
                }
                if !seen_ids.contains(dep.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
            }
        }

        // Cycles are rejected before any step can run
        let graph: Vec<(&str, &[String])> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.as_slice()))
            .collect();
        if let Err(cyclic) = topological_levels(&graph) {
            return Err(invalid(format!(
                "dependency cycle between steps: {}",
                cyclic.join(", ")
            )));
        }

        self.validate_conditions()
    }

    /// Conditions may only look at steps that are guaranteed to have finished
    fn validate_conditions(&self) -> Result<(), PipelineError> {
        let deps: HashMap<&str, &[String]> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.as_slice()))
            .collect();

        for step in &self.steps {
            let Some(condition) = &step.condition else {
                continue;
            };

            if !deps.contains_key(condition.step.as_str()) {
                return Err(invalid(format!(
                    "step '{}' condition references unknown step '{}'",
                    step.id, condition.step
                )));
            }
            if !ancestors(&deps, &step.id).contains(condition.step.as_str()) {
                return Err(invalid(format!(
                    "step '{}' condition references '{}', which is not one of its dependencies",
                    step.id, condition.step
                )));
            }

            let predicates = [
                condition.contains.is_some(),
                condition.matches.is_some(),
                condition.equals.is_some(),
                condition.status.is_some(),
            ];
            if predicates.iter().filter(|p| **p).count() != 1 {
                return Err(invalid(format!(
                    "step '{}' condition needs exactly one of contains, matches, equals, status",
                    step.id
                )));
            }
            if let Some(pattern) = &condition.matches {
                Regex::new(pattern).map_err(|e| {
                    invalid(format!(
                        "step '{}' condition has invalid regex '{}': {}",
                        step.id, pattern, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Effective max parallelism
    pub fn max_parallel(&self) -> usize {
        self.max_parallel.unwrap_or(DEFAULT_MAX_PARALLEL)
    }

    /// Convert definition to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline, PipelineError> {
        Pipeline::from_definition(self)
    }
}

/// All transitive dependencies of `step_id`
fn ancestors<'a>(deps: &HashMap<&'a str, &'a [String]>, step_id: &str) -> HashSet<&'a str> {
    let mut found = HashSet::new();
    let mut stack: Vec<&str> = deps
        .get(step_id)
        .map(|d| d.iter().map(String::as_str).collect())
        .unwrap_or_default();

    while let Some(id) = stack.pop() {
        if let Some((key, parents)) = deps.get_key_value(id) {
            if found.insert(*key) {
                stack.extend(parents.iter().map(String::as_str));
            }
        }
    }

    found
}

fn invalid(message: String) -> PipelineError {
    PipelineError::Validation(message)
}
