//! GitLab CI pipeline

use crate::adapters::{conditional_steps, job_ids, timeout_minutes, trigger_command, AdapterError, Platform, WorkflowAdapter};
use crate::core::{Pipeline, PipelineDefinition};
use serde::Serialize;
use std::path::PathBuf;

pub struct GitlabAdapter;

#[derive(Serialize)]
struct Job {
    stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    needs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    when: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    allow_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
    script: Vec<String>,
}

fn stage_name(level: usize) -> String {
    format!("level-{}", level + 1)
}

impl WorkflowAdapter for GitlabAdapter {
    fn platform(&self) -> Platform {
        Platform::Gitlab
    }

    fn default_output_path(&self, _definition: &PipelineDefinition) -> PathBuf {
        PathBuf::from(".gitlab-ci.yml")
    }

    fn render(&self, definition: &PipelineDefinition) -> Result<String, AdapterError> {
        let pipeline = Pipeline::from_definition(definition)?;
        let levels = pipeline.levels();
        let ids = job_ids(definition)?;
        conditional_steps(self.platform(), definition);

        let mut root = serde_yaml::Mapping::new();
        let stages: Vec<String> = (0..levels.len()).map(stage_name).collect();
        root.insert(
            "stages".into(),
            serde_yaml::to_value(&stages).map_err(|e| AdapterError::Render(e.to_string()))?,
        );

        for (level, level_ids) in levels.iter().enumerate() {
            for id in level_ids {
                let Some(step) = definition.steps.iter().find(|s| &s.id == id) else {
                    continue;
                };
                let job = Job {
                    stage: stage_name(level),
                    // an explicit empty list would make the job start immediately
                    needs: (!step.depends_on.is_empty())
                        .then(|| step.depends_on.iter().filter_map(|d| ids.get(d).cloned()).collect()),
                    when: step.run_on_failure.then_some("always"),
                    allow_failure: step.optional,
                    timeout: timeout_minutes(step, definition).map(|m| format!("{}m", m)),
                    script: vec![trigger_command(step)],
                };
                let value = serde_yaml::to_value(&job).map_err(|e| AdapterError::Render(e.to_string()))?;
                let Some(id) = ids.get(&step.id) else {
                    continue;
                };
                root.insert(id.as_str().into(), value);
            }
        }

        let header = format!("# Generated by agentful from pipeline '{}'\n", definition.name);
        let body = serde_yaml::to_string(&root).map_err(|e| AdapterError::Render(e.to_string()))?;
        Ok(header + &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::tests::ci_pipeline;

    #[test]
    fn test_stages_follow_levels() {
        let rendered = GitlabAdapter.render(&ci_pipeline()).unwrap();
        assert!(rendered.starts_with("# Generated by agentful"));
        let root: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();

        assert_eq!(
            root["stages"],
            serde_yaml::from_str::<serde_yaml::Value>("[level-1, level-2, level-3]").unwrap()
        );
        assert_eq!(root["build"]["stage"], "level-1");
        assert_eq!(root["lint"]["stage"], "level-1");
        assert_eq!(root["lint"]["allow_failure"], true);
        assert_eq!(root["test"]["stage"], "level-2");
        assert_eq!(root["report"]["when"], "always");
        assert_eq!(root["build"]["timeout"], "2m");
        assert!(root["build"]["needs"].is_null());
    }
}
