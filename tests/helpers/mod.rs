//! Test utilities shared by the integration tests

#![allow(dead_code)]

use agentful::agent::{
    AgentBackend, AgentDefinition, AgentError, AgentExecutor, AgentOutput, EventSink, InMemoryCatalog,
};
use agentful::core::{ExecutionStatus, Pipeline, PipelineContext, PipelineDefinition, StepState};
use agentful::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the scripted backend does for one agent
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeed with this output
    Reply(String),
    /// Succeed echoing the rendered task
    Echo,
    /// Exit with code 1 and this stderr
    Fail(String),
    /// Fail the first `n` calls, then reply
    FailTimes(u32, String),
    /// Sleep, then reply
    Delay(Duration, String),
    /// Never finish
    Hang,
}

/// Backend whose behavior is scripted per agent name
///
/// Every invocation is recorded as `(agent, task)` in call order.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<(String, String)>>,
    failures: Mutex<HashMap<String, u32>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, agent: &str, script: Script) -> Self {
        self.scripts.insert(agent.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, agent: &str) -> usize {
        self.calls().iter().filter(|(a, _)| a == agent).count()
    }
}

fn failed(message: &str) -> AgentOutput {
    AgentOutput {
        output: String::new(),
        exit_code: Some(1),
        error: Some(message.to_string()),
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn invoke(
        &self,
        definition: &AgentDefinition,
        task: &str,
        _env: &HashMap<String, String>,
        events: &EventSink,
    ) -> Result<AgentOutput, AgentError> {
        self.calls
            .lock()
            .unwrap()
            .push((definition.name.clone(), task.to_string()));
        events.progress(50).await;

        let script = self
            .scripts
            .get(&definition.name)
            .cloned()
            .unwrap_or(Script::Echo);
        match script {
            Script::Reply(output) => Ok(AgentOutput::text(output)),
            Script::Echo => Ok(AgentOutput::text(task)),
            Script::Fail(message) => Ok(failed(&message)),
            Script::FailTimes(n, output) => {
                let mut failures = self.failures.lock().unwrap();
                let count = failures.entry(definition.name.clone()).or_insert(0);
                if *count < n {
                    *count += 1;
                    Ok(failed("transient failure"))
                } else {
                    Ok(AgentOutput::text(output))
                }
            }
            Script::Delay(delay, output) => {
                tokio::time::sleep(delay).await;
                Ok(AgentOutput::text(output))
            }
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Executor over `backend` knowing every agent in `agents`
pub fn executor(backend: Arc<ScriptedBackend>, agents: &[&str]) -> AgentExecutor {
    let catalog = agents
        .iter()
        .fold(InMemoryCatalog::new(), |catalog, name| catalog.with_agent(name, "Do the work."));
    AgentExecutor::new(Arc::new(catalog), backend)
}

/// Result of running a pipeline in a test
pub struct PipelineRun {
    pub status: ExecutionStatus,
    pub pipeline: Pipeline,
    pub context: PipelineContext,
    pub events: Vec<ExecutionEvent>,
}

impl PipelineRun {
    pub fn state(&self, step_id: &str) -> &StepState {
        &self.pipeline.step(step_id).expect("unknown step").state
    }

    pub fn output(&self, step_id: &str) -> Option<&str> {
        self.context.get_step_output(step_id)
    }

    /// Step ids in the order their completion was reported
    pub fn completion_order(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::StepCompleted { step_id, .. } | ExecutionEvent::StepFailed { step_id, .. } => {
                    Some(step_id.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Step ids in the order they started their first attempt
    pub fn start_order(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::StepStarted { step_id, attempt: 1 } => Some(step_id.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Parse `yaml` and run it against `backend`
pub async fn run_yaml(yaml: &str, backend: Arc<ScriptedBackend>, strategy: Option<SchedulingStrategy>) -> PipelineRun {
    let definition = PipelineDefinition::from_yaml(yaml).expect("valid pipeline");
    let agents: Vec<&str> = definition.steps.iter().map(|s| s.agent.as_str()).collect();
    let mut pipeline = Pipeline::from_definition(&definition).expect("valid graph");

    let strategy = strategy.unwrap_or_else(|| SchedulingStrategy::for_pipeline(&pipeline));
    let engine = ExecutionEngine::new(executor(backend, &agents), strategy);
    let mut rx = engine.subscribe();

    let mut context = pipeline.initial_context();
    let status = engine.run(&mut pipeline, &mut context).await;
    drop(engine);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    PipelineRun {
        status,
        pipeline,
        context,
        events,
    }
}

pub fn assert_completed(run: &PipelineRun, step_id: &str) {
    assert!(
        matches!(run.state(step_id), StepState::Completed { .. }),
        "expected '{}' to be completed, got {:?}",
        step_id,
        run.state(step_id)
    );
}

pub fn assert_failed(run: &PipelineRun, step_id: &str) {
    assert!(
        matches!(run.state(step_id), StepState::Failed { .. }),
        "expected '{}' to have failed, got {:?}",
        step_id,
        run.state(step_id)
    );
}

pub fn assert_skipped(run: &PipelineRun, step_id: &str) {
    assert!(
        matches!(run.state(step_id), StepState::Skipped { .. }),
        "expected '{}' to be skipped, got {:?}",
        step_id,
        run.state(step_id)
    );
}
