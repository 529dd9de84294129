//! Test: Retry Behavior - per-step retries and timeouts

use crate::helpers::*;
use agentful::core::{ExecutionStatus, StepState};
use agentful::execution::ExecutionEvent;
use std::sync::Arc;

/// A flaky step succeeds within its retry budget
#[tokio::test]
async fn test_retry_until_success() {
    let yaml = r#"
name: "flaky"

steps:
  - id: "integration"
    agent: "tester"
    retries: 2
    input: "run integration tests"
"#;

    let backend = Arc::new(ScriptedBackend::new().script("tester", Script::FailTimes(2, "all green".to_string())));
    let run = run_yaml(yaml, backend.clone(), None).await;

    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_eq!(backend.call_count("tester"), 3);
    match run.state("integration") {
        StepState::Completed { attempts, output, .. } => {
            assert_eq!(*attempts, 3);
            assert_eq!(output, "all green");
        }
        other => panic!("unexpected state {:?}", other),
    }

    let retries: Vec<(u32, u32)> = run
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StepRetrying {
                attempt, max_attempts, ..
            } => Some((*attempt, *max_attempts)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(2, 3), (3, 3)]);
}

/// Exhausting the retries fails the step with the last error
#[tokio::test]
async fn test_retries_exhausted() {
    let yaml = r#"
name: "broken"

defaults:
  retries: 1

steps:
  - id: "build"
    agent: "builder"
    input: "build"
"#;

    let backend = Arc::new(ScriptedBackend::new().script("builder", Script::Fail("linker error".to_string())));
    let run = run_yaml(yaml, backend.clone(), None).await;

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(backend.call_count("builder"), 2);
    match run.state("build") {
        StepState::Failed { attempts, error, .. } => {
            assert_eq!(*attempts, 2);
            assert!(error.contains("linker error"), "error was {}", error);
        }
        other => panic!("unexpected state {:?}", other),
    }
}

/// A hanging agent is stopped by the step timeout and each attempt gets its own
#[tokio::test]
async fn test_timeout_applies_per_attempt() {
    let yaml = r#"
name: "hang"

steps:
  - id: "stuck"
    agent: "sleeper"
    timeout: 1
    retries: 1
    input: "wait forever"
"#;

    let backend = Arc::new(ScriptedBackend::new().script("sleeper", Script::Hang));
    let started = std::time::Instant::now();
    let run = run_yaml(yaml, backend.clone(), None).await;

    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(backend.call_count("sleeper"), 2);
    assert!(started.elapsed() >= std::time::Duration::from_secs(2));
    match run.state("stuck") {
        StepState::Failed { error, .. } => assert!(error.to_lowercase().contains("timeout"), "error was {}", error),
        other => panic!("unexpected state {:?}", other),
    }
}
