//! Test: Variable Substitution - pipeline variables and upstream outputs in inputs

use crate::helpers::*;
use agentful::core::{ExecutionStatus, Pipeline, PipelineDefinition};
use agentful::execution::ExecutionEngine;
use std::sync::Arc;

/// Pipeline variables render into step inputs
#[tokio::test]
async fn test_pipeline_variables() {
    let yaml = r#"
name: "vars"

variables:
  project: "agentful"
  version: "1.0.0"

steps:
  - id: "info"
    agent: "writer"
    input: "Release notes for {{ project }} v{{version}}"
"#;

    let backend = Arc::new(ScriptedBackend::new());
    let run = run_yaml(yaml, backend.clone(), None).await;

    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_eq!(backend.calls()[0].1, "Release notes for agentful v1.0.0");
}

/// Unknown placeholders are left in place
#[tokio::test]
async fn test_unknown_placeholder_is_kept() {
    let yaml = r#"
name: "unknown"
steps:
  - id: "only"
    agent: "writer"
    input: "Hello {{ nobody }}"
"#;

    let backend = Arc::new(ScriptedBackend::new());
    run_yaml(yaml, backend.clone(), None).await;

    assert_eq!(backend.calls()[0].1, "Hello {{ nobody }}");
}

/// Outputs and statuses of any finished ancestor are available
#[tokio::test]
async fn test_upstream_outputs_and_statuses() {
    let yaml = r#"
name: "chain"

steps:
  - id: "design"
    agent: "architect"
    input: "design"

  - id: "api"
    agent: "backend"
    dependsOn: ["design"]
    input: "api for {{ steps.design.output }}"

  - id: "docs"
    agent: "writer"
    dependsOn: ["api"]
    input: "{{ steps.design.output }} / {{ steps.api.output }} ({{ steps.api.status }})"
"#;

    let backend = Arc::new(
        ScriptedBackend::new()
            .script("architect", Script::Reply("REST".to_string()))
            .script("backend", Script::Reply("GET /users".to_string())),
    );
    let run = run_yaml(yaml, backend, None).await;

    assert_eq!(run.output("docs"), Some("REST / GET /users (completed)"));
}

/// Variables overridden before the run win over the file
#[tokio::test]
async fn test_override_before_run() {
    let yaml = r#"
name: "override"
variables:
  env: "staging"
steps:
  - id: "deploy"
    agent: "deployer"
    input: "deploy to {{ env }}"
"#;

    let definition = PipelineDefinition::from_yaml(yaml).unwrap();
    let mut pipeline = Pipeline::from_definition(&definition).unwrap();
    pipeline.variables.insert("env".to_string(), "production".to_string());

    let backend = Arc::new(ScriptedBackend::new());
    let engine = ExecutionEngine::for_pipeline(executor(backend.clone(), &["deployer"]), &pipeline);
    let mut context = pipeline.initial_context();
    let status = engine.run(&mut pipeline, &mut context).await;

    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(backend.calls()[0].1, "deploy to production");
}
