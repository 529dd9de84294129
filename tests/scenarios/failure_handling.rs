//! Test: Failure Handling - propagation, run_on_failure and optional steps

use crate::helpers::*;
use agentful::core::{ExecutionStatus, SkipReason, StepState};
use agentful::execution::ExecutionEvent;
use agentful::persistence::create_summary;
use std::sync::Arc;

const CI: &str = r#"
name: "ci"

steps:
  - id: "build"
    agent: "builder"
    input: "build"

  - id: "test"
    agent: "tester"
    dependsOn: ["build"]
    input: "test"

  - id: "deploy"
    agent: "deployer"
    dependsOn: ["test"]
    input: "deploy"

  - id: "notify"
    agent: "notifier"
    dependsOn: ["deploy"]
    runOnFailure: true
    input: "build={{ steps.build.status }} deploy={{ steps.deploy.status }}"
"#;

/// A failed build skips everything downstream and fails the pipeline
#[tokio::test]
async fn test_failure_skips_dependents() {
    let backend = Arc::new(ScriptedBackend::new().script("builder", Script::Fail("compile error".to_string())));
    let run = run_yaml(CI, backend.clone(), None).await;

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_failed(&run, "build");
    assert_skipped(&run, "test");
    assert_skipped(&run, "deploy");

    match run.state("test") {
        StepState::Skipped { reason } => {
            assert_eq!(reason, &SkipReason::UpstreamFailed { step: "build".to_string() })
        }
        other => panic!("unexpected state {:?}", other),
    }
    // propagated through the skipped step
    match run.state("deploy") {
        StepState::Skipped { reason } => assert!(reason.is_failure()),
        other => panic!("unexpected state {:?}", other),
    }

    assert_eq!(backend.call_count("tester"), 0);
    assert_eq!(backend.call_count("deployer"), 0);
    assert!(run.events.iter().any(|e| matches!(
        e,
        ExecutionEvent::StepFailed { step_id, error } if step_id == "build" && error.contains("compile error")
    )));
}

/// run_on_failure steps still run and see upstream statuses
#[tokio::test]
async fn test_run_on_failure_step_still_runs() {
    let backend = Arc::new(ScriptedBackend::new().script("builder", Script::Fail("compile error".to_string())));
    let run = run_yaml(CI, backend.clone(), None).await;

    assert_completed(&run, "notify");
    assert_eq!(run.output("notify"), Some("build=failed deploy=skipped"));
    assert_eq!(run.status, ExecutionStatus::Failed);
}

/// The history summary counts each terminal state
#[tokio::test]
async fn test_summary_counts() {
    let backend = Arc::new(ScriptedBackend::new().script("tester", Script::Fail("2 tests failed".to_string())));
    let run = run_yaml(CI, backend, None).await;

    let summary = create_summary(&run.pipeline);
    assert_eq!(summary.status, ExecutionStatus::Failed);
    assert_eq!(summary.total_steps, 4);
    assert_eq!(summary.completed_steps, 2);
    assert_eq!(summary.failed_steps, 1);
    assert_eq!(summary.skipped_steps, 1);
    assert!(summary.completed_at.is_some());
}

/// A failing optional step does not fail the pipeline
#[tokio::test]
async fn test_optional_failure_keeps_pipeline_green() {
    let yaml = r#"
name: "lint optional"

steps:
  - id: "lint"
    agent: "linter"
    optional: true
    input: "lint"

  - id: "build"
    agent: "builder"
    input: "build"
"#;

    let backend = Arc::new(ScriptedBackend::new().script("linter", Script::Fail("style".to_string())));
    let run = run_yaml(yaml, backend, None).await;

    assert_failed(&run, "lint");
    assert_completed(&run, "build");
    assert_eq!(run.status, ExecutionStatus::Completed);
}

/// Unknown agents fail the step without reaching the backend
#[tokio::test]
async fn test_unknown_agent_fails_step() {
    use agentful::core::{Pipeline, PipelineDefinition};
    use agentful::execution::{ExecutionEngine, SchedulingStrategy};

    let yaml = r#"
name: "missing agent"
steps:
  - id: "only"
    agent: "ghost"
    input: "boo"
"#;
    let definition = PipelineDefinition::from_yaml(yaml).unwrap();
    let mut pipeline = Pipeline::from_definition(&definition).unwrap();
    let backend = Arc::new(ScriptedBackend::new());
    let engine = ExecutionEngine::new(executor(backend.clone(), &["someone-else"]), SchedulingStrategy::Parallel);

    let mut context = pipeline.initial_context();
    let status = engine.run(&mut pipeline, &mut context).await;

    assert_eq!(status, ExecutionStatus::Failed);
    assert!(backend.calls().is_empty());
}
