//! Test: Conditions - gating steps on upstream outcomes

use crate::helpers::*;
use agentful::core::{ExecutionStatus, SkipReason, StepState};
use std::sync::Arc;

const REVIEW: &str = r#"
name: "review gate"

steps:
  - id: "review"
    agent: "reviewer"
    input: "review the change"

  - id: "merge"
    agent: "merger"
    dependsOn: ["review"]
    condition:
      step: "review"
      contains: "APPROVED"
    input: "merge"

  - id: "announce"
    agent: "announcer"
    dependsOn: ["merge"]
    input: "announce"

  - id: "fix"
    agent: "fixer"
    dependsOn: ["review"]
    condition:
      step: "review"
      contains: "APPROVED"
      negate: true
    input: "address: {{ steps.review.output }}"
"#;

/// An approved review merges and skips the fix branch
#[tokio::test]
async fn test_approved_review() {
    let backend = Arc::new(ScriptedBackend::new().script("reviewer", Script::Reply("LGTM, APPROVED".to_string())));
    let run = run_yaml(REVIEW, backend.clone(), None).await;

    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_completed(&run, "merge");
    assert_completed(&run, "announce");
    assert!(matches!(
        run.state("fix"),
        StepState::Skipped {
            reason: SkipReason::ConditionNotMet
        }
    ));
    assert_eq!(backend.call_count("fixer"), 0);
}

/// A rejected review takes the fix branch
#[tokio::test]
async fn test_rejected_review() {
    let backend = Arc::new(ScriptedBackend::new().script("reviewer", Script::Reply("CHANGES REQUESTED".to_string())));
    let run = run_yaml(REVIEW, backend.clone(), None).await;

    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_skipped(&run, "merge");
    assert_completed(&run, "fix");
    assert_eq!(run.output("fix"), Some("address: CHANGES REQUESTED"));

    // a condition skip is not a failure, so dependents still get scheduled
    assert_completed(&run, "announce");
}

/// Regex and status conditions
#[tokio::test]
async fn test_regex_and_status_conditions() {
    let yaml = r#"
name: "coverage"

steps:
  - id: "test"
    agent: "tester"
    input: "test"

  - id: "badge"
    agent: "badger"
    dependsOn: ["test"]
    condition:
      step: "test"
      matches: "coverage: 9\\d%"
    input: "badge"

  - id: "celebrate"
    agent: "party"
    dependsOn: ["test"]
    condition:
      step: "test"
      status: "completed"
    input: "party"
"#;

    let backend = Arc::new(ScriptedBackend::new().script("tester", Script::Reply("coverage: 87%".to_string())));
    let run = run_yaml(yaml, backend, None).await;

    assert_skipped(&run, "badge");
    assert_completed(&run, "celebrate");
}
