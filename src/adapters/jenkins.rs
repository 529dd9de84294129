//! Jenkins declarative pipeline

use crate::adapters::{conditional_steps, timeout_minutes, trigger_command, AdapterError, Platform, WorkflowAdapter};
use crate::core::{Pipeline, PipelineDefinition, StepDefinition};
use std::fmt::Write;
use std::path::PathBuf;

/// Each dependency level becomes one stage, with a `parallel` block when the
/// level has several steps. Steps that must run after failures go to
/// `post { always { .. } }`.
pub struct JenkinsAdapter;

fn groovy_quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', r"\\").replace('\'', r"\'"))
}

fn step_body(out: &mut String, step: &StepDefinition, definition: &PipelineDefinition, indent: &str) {
    let mut sh = format!("sh {}", groovy_quote(&trigger_command(step)));
    if step.optional {
        sh = format!("catchError(buildResult: 'SUCCESS', stageResult: 'FAILURE') {{ {} }}", sh);
    }
    if let Some(minutes) = timeout_minutes(step, definition) {
        sh = format!("timeout(time: {}, unit: 'MINUTES') {{ {} }}", minutes, sh);
    }
    let _ = writeln!(out, "{}{}", indent, sh);
}

impl WorkflowAdapter for JenkinsAdapter {
    fn platform(&self) -> Platform {
        Platform::Jenkins
    }

    fn default_output_path(&self, _definition: &PipelineDefinition) -> PathBuf {
        PathBuf::from("Jenkinsfile")
    }

    fn render(&self, definition: &PipelineDefinition) -> Result<String, AdapterError> {
        let pipeline = Pipeline::from_definition(definition)?;
        conditional_steps(self.platform(), definition);
        let step = |id: &String| definition.steps.iter().find(|s| &s.id == id);

        let mut out = String::new();
        let _ = writeln!(out, "// Generated by agentful from pipeline '{}'", definition.name);
        out.push_str("pipeline {\n    agent any\n    stages {\n");

        let mut always = Vec::new();
        for (level, ids) in pipeline.levels().iter().enumerate() {
            let steps: Vec<&StepDefinition> = ids
                .iter()
                .filter_map(step)
                .filter(|s| {
                    if s.run_on_failure {
                        always.push(*s);
                        false
                    } else {
                        true
                    }
                })
                .collect();
            match steps.as_slice() {
                [] => {}
                [single] => {
                    let _ = writeln!(out, "        stage({}) {{", groovy_quote(single.display_name()));
                    out.push_str("            steps {\n");
                    step_body(&mut out, single, definition, "                ");
                    out.push_str("            }\n        }\n");
                }
                many => {
                    let _ = writeln!(out, "        stage('Level {}') {{", level + 1);
                    out.push_str("            parallel {\n");
                    for s in many {
                        let _ = writeln!(out, "                stage({}) {{", groovy_quote(s.display_name()));
                        out.push_str("                    steps {\n");
                        step_body(&mut out, s, definition, "                        ");
                        out.push_str("                    }\n                }\n");
                    }
                    out.push_str("            }\n        }\n");
                }
            }
        }
        out.push_str("    }\n");

        if !always.is_empty() {
            out.push_str("    post {\n        always {\n");
            for s in always {
                step_body(&mut out, s, definition, "            ");
            }
            out.push_str("        }\n    }\n");
        }
        out.push_str("}\n");
        Ok(out)
    }
}
