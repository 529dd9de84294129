//! Test: Success Chain - dependency order and parallel levels

use crate::helpers::*;
use agentful::core::ExecutionStatus;
use agentful::execution::SchedulingStrategy;
use std::sync::Arc;
use std::time::Duration;

/// Steps of a linear chain run one after another, each seeing the previous output
#[tokio::test]
async fn test_linear_chain() {
    let yaml = r#"
name: "Success Chain"

steps:
  - id: "plan"
    agent: "planner"
    input: "Plan the login form"

  - id: "implement"
    agent: "backend"
    dependsOn: ["plan"]
    input: "Implement: {{ steps.plan.output }}"

  - id: "review"
    agent: "reviewer"
    dependsOn: ["implement"]
    input: "Review: {{ steps.implement.output }}"
"#;

    let backend = Arc::new(
        ScriptedBackend::new()
            .script("planner", Script::Reply("1. form 2. validation".to_string()))
            .script("backend", Script::Reply("form.tsx written".to_string())),
    );
    let run = run_yaml(yaml, backend.clone(), None).await;

    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_eq!(run.completion_order(), vec!["plan", "implement", "review"]);
    for step in ["plan", "implement", "review"] {
        assert_completed(&run, step);
    }

    let calls = backend.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].1, "Implement: 1. form 2. validation");
    assert_eq!(run.output("review"), Some("Review: form.tsx written"));
}

/// Independent steps overlap; the join waits for both
#[tokio::test]
async fn test_diamond_runs_branches_in_parallel() {
    let yaml = r#"
name: "Diamond"
max_parallel: 4

steps:
  - id: "setup"
    agent: "ops"
    input: "setup"

  - id: "frontend"
    agent: "slow-frontend"
    dependsOn: ["setup"]
    input: "frontend"

  - id: "backend"
    agent: "slow-backend"
    dependsOn: ["setup"]
    input: "backend"

  - id: "ship"
    agent: "ops"
    dependsOn: ["frontend", "backend"]
    input: "ship"
"#;

    let backend = Arc::new(
        ScriptedBackend::new()
            .script("slow-frontend", Script::Delay(Duration::from_millis(400), "fe".to_string()))
            .script("slow-backend", Script::Delay(Duration::from_millis(400), "be".to_string())),
    );

    let started = std::time::Instant::now();
    let run = run_yaml(yaml, backend, None).await;
    let elapsed = started.elapsed();

    assert_eq!(run.status, ExecutionStatus::Completed);
    assert!(elapsed < Duration::from_millis(750), "branches did not overlap: {:?}", elapsed);

    let order = run.completion_order();
    assert_eq!(order.first().map(String::as_str), Some("setup"));
    assert_eq!(order.last().map(String::as_str), Some("ship"));

    let starts = run.start_order();
    let ship = starts.iter().position(|s| s == "ship").unwrap();
    let frontend_done = order.iter().position(|s| s == "frontend").unwrap();
    let backend_done = order.iter().position(|s| s == "backend").unwrap();
    assert_eq!(ship, 3);
    assert!(frontend_done < 3 && backend_done < 3);
}

/// The sequential strategy never overlaps steps
#[tokio::test]
async fn test_sequential_strategy() {
    let yaml = r#"
name: "Sequential"

steps:
  - id: "a"
    agent: "slow"
    input: "a"

  - id: "b"
    agent: "slow"
    input: "b"
"#;

    let backend = Arc::new(ScriptedBackend::new().script("slow", Script::Delay(Duration::from_millis(150), "ok".to_string())));

    let started = std::time::Instant::now();
    let run = run_yaml(yaml, backend, Some(SchedulingStrategy::Sequential)).await;

    assert_eq!(run.status, ExecutionStatus::Completed);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(run.start_order(), vec!["a", "b"]);
}

/// Events bracket the run and report the step count
#[tokio::test]
async fn test_event_stream_brackets_run() {
    use agentful::execution::ExecutionEvent;

    let yaml = r#"
name: "Events"
steps:
  - id: "only"
    agent: "worker"
    input: "work"
"#;

    let run = run_yaml(yaml, Arc::new(ScriptedBackend::new()), None).await;

    assert!(matches!(
        run.events.first(),
        Some(ExecutionEvent::PipelineStarted { total_steps: 1, .. })
    ));
    assert!(matches!(
        run.events.last(),
        Some(ExecutionEvent::PipelineCompleted {
            status: ExecutionStatus::Completed,
            ..
        })
    ));
    assert!(run
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StepProgress { percent: 50, .. })));
}
