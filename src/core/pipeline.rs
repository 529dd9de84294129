//! Pipeline domain model

use crate::core::{
    config::PipelineDefinition,
    context::PipelineContext,
    error::PipelineError,
    state::{ExecutionStatus, PipelineState, StepState},
    step::{Step, StepDefaults},
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A pipeline ready to execute
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Global variables available to all steps
    pub variables: BTreeMap<String, String>,

    /// Pipeline steps
    pub steps: HashMap<String, Step>,

    /// Maximum steps executing at once
    pub max_parallel: usize,

    /// Execution state
    pub state: PipelineState,

    /// Steps grouped by dependency depth
    levels: Vec<Vec<String>>,
}

impl Pipeline {
    /// Build a pipeline from a validated definition
    pub fn from_definition(definition: &PipelineDefinition) -> Result<Self, PipelineError> {
        let defaults = StepDefaults {
            retries: definition.defaults.retries.unwrap_or(0),
            timeout_secs: definition
                .defaults
                .timeout
                .unwrap_or(crate::core::step::DEFAULT_STEP_TIMEOUT_SECS),
        };

        let mut steps = HashMap::new();
        for step_definition in &definition.steps {
            let step = Step::from_definition(step_definition, &defaults)?;
            steps.insert(step.id.clone(), step);
        }

        let graph: Vec<(&str, &[String])> = definition
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.as_slice()))
            .collect();
        let levels = topological_levels(&graph).map_err(|cyclic| {
            PipelineError::Validation(format!(
                "dependency cycle between steps: {}",
                cyclic.join(", ")
            ))
        })?;

        Ok(Pipeline {
            name: definition.name.clone(),
            variables: definition.variables.clone(),
            steps,
            max_parallel: definition.max_parallel(),
            state: PipelineState::new(),
            levels,
        })
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    /// Get a mutable step by ID
    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.get_mut(id)
    }

    /// Steps whose dependencies have all finished without blocking them
    ///
    /// Returned in execution order so scheduling is deterministic.
    pub fn ready_steps(&self) -> Vec<&Step> {
        self.pending_in_order()
            .filter(|step| self.dependencies_finished(step) && self.blocking_dependency(step).is_none())
            .collect()
    }

    /// Pending steps that can never run, paired with the dependency blocking them
    pub fn blocked_steps(&self) -> Vec<(String, String)> {
        self.pending_in_order()
            .filter(|step| self.dependencies_finished(step))
            .filter_map(|step| {
                self.blocking_dependency(step)
                    .map(|dep| (step.id.clone(), dep.to_string()))
            })
            .collect()
    }

    fn pending_in_order(&self) -> impl Iterator<Item = &Step> {
        self.execution_order()
            .filter_map(|id| self.steps.get(id))
            .filter(|step| matches!(step.state, StepState::Pending))
    }

    fn dependencies_finished(&self, step: &Step) -> bool {
        step.dependencies.iter().all(|dep| {
            self.steps
                .get(dep)
                .map(|d| d.state.is_terminal())
                .unwrap_or(false)
        })
    }

    fn blocking_dependency<'a>(&self, step: &'a Step) -> Option<&'a str> {
        if step.run_on_failure {
            return None;
        }
        step.dependencies
            .iter()
            .find(|dep| {
                self.steps
                    .get(dep.as_str())
                    .map(|d| d.state.blocks_dependents())
                    .unwrap_or(false)
            })
            .map(String::as_str)
    }

    /// Get all currently running steps
    pub fn running_steps(&self) -> Vec<&Step> {
        self.steps
            .values()
            .filter(|s| matches!(s.state, StepState::Running { .. }))
            .collect()
    }

    /// Check if every step reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.steps.values().all(|s| s.state.is_terminal())
    }

    /// Whether a non-optional step failed
    pub fn has_failed(&self) -> bool {
        self.steps
            .values()
            .any(|s| !s.optional && matches!(s.state, StepState::Failed { .. }))
    }

    /// Status the pipeline finishes with
    pub fn final_status(&self) -> ExecutionStatus {
        if self.has_failed() {
            ExecutionStatus::Failed
        } else if self.is_complete() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Cancelled
        }
    }

    /// Step ids in topological order
    pub fn execution_order(&self) -> impl Iterator<Item = &String> {
        self.levels.iter().flatten()
    }

    /// Steps grouped by dependency depth
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    /// Fresh context carrying the pipeline variables
    pub fn initial_context(&self) -> PipelineContext {
        PipelineContext::with_variables(self.variables.clone())
    }

    /// Refresh the step counters in `state`
    pub fn update_counts(&mut self) {
        let mut completed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for step in self.steps.values() {
            match step.state {
                StepState::Completed { .. } => completed += 1,
                StepState::Failed { .. } => failed += 1,
                StepState::Skipped { .. } => skipped += 1,
                _ => {}
            }
        }
        self.state.total_steps = self.steps.len();
        self.state.completed_steps = completed;
        self.state.failed_steps = failed;
        self.state.skipped_steps = skipped;
    }
}

/// Group nodes into dependency levels with Kahn's algorithm
///
/// Each level holds the nodes whose dependencies all sit in earlier levels,
/// sorted by id. Dependencies on ids outside the graph are ignored. On a
/// cycle, returns the sorted ids of the nodes that could not be scheduled.
pub fn topological_levels(graph: &[(&str, &[String])]) -> Result<Vec<Vec<String>>, Vec<String>> {
    let known: BTreeSet<&str> = graph.iter().map(|(id, _)| *id).collect();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (id, deps) in graph {
        let entry = in_degree.entry(*id).or_insert(0);
        for dep in deps.iter().filter(|d| known.contains(d.as_str())) {
            *entry += 1;
            dependents.entry(dep.as_str()).or_default().push(*id);
        }
    }

    let mut levels = Vec::new();
    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut scheduled = 0;

    while !current.is_empty() {
        scheduled += current.len();
        let mut next = BTreeSet::new();
        for id in &current {
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.insert(*dependent);
                    }
                }
            }
        }
        levels.push(current.iter().map(|s| s.to_string()).collect());
        current = next.into_iter().collect();
    }

    if scheduled < in_degree.len() {
        return Err(in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id.to_string())
            .collect());
    }

    Ok(levels)
}
