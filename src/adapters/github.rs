//! GitHub Actions workflow

use crate::adapters::{conditional_steps, job_ids, slug, timeout_minutes, trigger_command, AdapterError, Platform, WorkflowAdapter};
use crate::core::{Pipeline, PipelineDefinition};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub struct GithubActionsAdapter;

#[derive(Serialize)]
struct Workflow {
    name: String,
    on: BTreeMap<&'static str, serde_yaml::Mapping>,
    jobs: serde_yaml::Mapping,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Job {
    name: String,
    runs_on: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    needs: Vec<String>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    condition: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    continue_on_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_minutes: Option<u64>,
    steps: Vec<JobStep>,
}

#[derive(Serialize)]
struct JobStep {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uses: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<String>,
}

impl WorkflowAdapter for GithubActionsAdapter {
    fn platform(&self) -> Platform {
        Platform::GithubActions
    }

    fn default_output_path(&self, definition: &PipelineDefinition) -> PathBuf {
        PathBuf::from(".github/workflows").join(format!("{}.yml", slug(&definition.name)))
    }

    fn render(&self, definition: &PipelineDefinition) -> Result<String, AdapterError> {
        let pipeline = Pipeline::from_definition(definition)?;
        let ids = job_ids(definition)?;
        conditional_steps(self.platform(), definition);

        let mut jobs = serde_yaml::Mapping::new();
        for id in pipeline.execution_order() {
            let Some(step) = definition.steps.iter().find(|s| &s.id == id) else {
                continue;
            };
            let job = Job {
                name: step.display_name().to_string(),
                runs_on: "ubuntu-latest",
                needs: step.depends_on.iter().filter_map(|d| ids.get(d).cloned()).collect(),
                condition: step.run_on_failure.then_some("always()"),
                continue_on_error: step.optional,
                timeout_minutes: timeout_minutes(step, definition),
                steps: vec![
                    JobStep {
                        name: None,
                        uses: Some("actions/checkout@v4"),
                        run: None,
                    },
                    JobStep {
                        name: Some(format!("Run {}", step.agent)),
                        uses: None,
                        run: Some(trigger_command(step)),
                    },
                ],
            };
            let value = serde_yaml::to_value(&job).map_err(|e| AdapterError::Render(e.to_string()))?;
            let Some(id) = ids.get(&step.id) else {
                continue;
            };
            jobs.insert(serde_yaml::Value::String(id.clone()), value);
        }

        let mut on = BTreeMap::new();
        on.insert("workflow_dispatch", serde_yaml::Mapping::new());
        let workflow = Workflow {
            name: definition.name.clone(),
            on,
            jobs,
        };
        serde_yaml::to_string(&workflow).map_err(|e| AdapterError::Render(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::tests::ci_pipeline;

    #[test]
    fn test_jobs_follow_dependencies() {
        let rendered = GithubActionsAdapter.render(&ci_pipeline()).unwrap();
        let workflow: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        let jobs = &workflow["jobs"];

        assert_eq!(workflow["name"], "CI Checks");
        assert!(jobs["build"]["needs"].is_null());
        assert_eq!(
            jobs["test"]["needs"],
            serde_yaml::from_str::<serde_yaml::Value>("[build, lint]").unwrap()
        );
        assert_eq!(jobs["report"]["if"], "always()");
        assert_eq!(jobs["lint"]["continue-on-error"], true);
        assert_eq!(jobs["build"]["timeout-minutes"], 2);
        assert_eq!(
            jobs["build"]["steps"][1]["run"],
            r"agentful trigger 'backend' 'Build it'\''s all'"
        );
    }
}
