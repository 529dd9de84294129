//! Step executor - runs individual steps with the agent, including retries

use crate::{
    agent::{AgentError, AgentEvent, AgentExecutor, AgentTask, ExecuteOptions},
    core::{PipelineContext, Step},
    execution::engine::{EventBus, ExecutionEvent},
};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Capacity of the per-attempt agent event channel
const STEP_EVENT_CAPACITY: usize = 64;

/// Result of executing a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// Step completed successfully
    Success { output: String, attempts: u32 },
    /// Step failed on every attempt
    Failed { error: String, attempts: u32 },
}

/// Executes a single step
#[derive(Debug, Clone)]
pub struct StepExecutor {
    agent: AgentExecutor,
    env: HashMap<String, String>,
}

impl StepExecutor {
    pub fn new(agent: AgentExecutor) -> Self {
        Self {
            agent,
            env: HashMap::new(),
        }
    }

    /// Environment passed to every agent invocation
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Execute a step, retrying failed attempts
    ///
    /// Agent failures and timeouts are retried up to `step.retries` times, each
    /// attempt with its own timeout. Contract violations are not retried.
    pub async fn execute(&self, step: &Step, context: &PipelineContext, events: &EventBus) -> StepResult {
        let input = step.render_input(&context.get_rendering_variables());
        let max_attempts = step.retries + 1;
        debug!(step_id = %step.id, "Rendered input: {}", input);

        let mut env = self.env.clone();
        env.insert("AGENTFUL_STEP_ID".to_string(), step.id.clone());

        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                warn!(step_id = %step.id, attempt, max_attempts, "Retrying step: {}", last_error);
                events.emit(ExecutionEvent::StepRetrying {
                    step_id: step.id.clone(),
                    attempt,
                    max_attempts,
                    error: last_error.clone(),
                });
            }

            info!(step_id = %step.id, agent = %step.agent, attempt, "Executing step");
            events.emit(ExecutionEvent::StepStarted {
                step_id: step.id.clone(),
                attempt,
            });

            let task = AgentTask::new(format!("{}#{}", step.id, attempt), &step.agent, &input);
            let (tx, rx) = mpsc::channel(STEP_EVENT_CAPACITY);
            let forwarder = tokio::spawn(forward_agent_events(step.id.clone(), rx, events.clone()));

            let options = ExecuteOptions::with_timeout(step.timeout()).events(tx);
            let result = self.agent.execute(&task, &env, options).await;
            // The sender is gone once execute returns, so the forwarder drains and ends.
            let _ = forwarder.await;

            match result {
                Ok(outcome) if outcome.success => {
                    return StepResult::Success {
                        output: outcome.output,
                        attempts: attempt,
                    };
                }
                Ok(outcome) => {
                    last_error = outcome
                        .error
                        .unwrap_or_else(|| "agent reported failure".to_string());
                }
                Err(AgentError::Contract(message)) => {
                    error!(step_id = %step.id, "Step violates agent contract: {}", message);
                    return StepResult::Failed {
                        error: format!("contract violation: {}", message),
                        attempts: attempt,
                    };
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        error!(step_id = %step.id, attempts = max_attempts, "Step failed: {}", last_error);
        StepResult::Failed {
            error: last_error,
            attempts: max_attempts,
        }
    }
}

async fn forward_agent_events(step_id: String, mut rx: mpsc::Receiver<AgentEvent>, events: EventBus) {
    while let Some(event) = rx.recv().await {
        let event = match event {
            AgentEvent::Progress(percent) => ExecutionEvent::StepProgress {
                step_id: step_id.clone(),
                percent,
            },
            AgentEvent::Log(line) => ExecutionEvent::StepLog {
                step_id: step_id.clone(),
                line,
            },
        };
        events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentBackend, AgentDefinition, AgentOutput, EventSink, InMemoryCatalog};
    use crate::core::{StepDefaults, StepDefinition};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` calls, then echoes the task
    struct FlakyBackend {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AgentBackend for FlakyBackend {
        async fn invoke(
            &self,
            _definition: &AgentDefinition,
            task: &str,
            _env: &HashMap<String, String>,
            events: &EventSink,
        ) -> Result<AgentOutput, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            events.log(format!("call {}", call)).await;
            if call < self.failures {
                return Err(AgentError::Api("flaky".to_string()));
            }
            Ok(AgentOutput::text(task))
        }
    }

    fn step(retries: u32) -> Step {
        let definition = StepDefinition {
            id: "build".to_string(),
            name: None,
            agent: "backend".to_string(),
            input: "build {{ target }}".to_string(),
            depends_on: Vec::new(),
            condition: None,
            timeout: Some(5),
            retries: Some(retries),
            run_on_failure: false,
            optional: false,
        };
        Step::from_definition(&definition, &StepDefaults::default()).unwrap()
    }

    fn executor(failures: u32) -> StepExecutor {
        let catalog = InMemoryCatalog::new().with_agent("backend", "");
        let backend = FlakyBackend {
            failures,
            calls: AtomicU32::new(0),
        };
        StepExecutor::new(AgentExecutor::new(Arc::new(catalog), Arc::new(backend)))
    }

    fn context() -> PipelineContext {
        let mut context = PipelineContext::new();
        context.set_variable("target", "api");
        context
    }

    #[tokio::test]
    async fn test_step_success() {
        let bus = EventBus::default();
        let result = executor(0).execute(&step(0), &context(), &bus).await;
        assert_eq!(
            result,
            StepResult::Success {
                output: "build api".to_string(),
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn test_step_retries_then_succeeds() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let result = executor(2).execute(&step(2), &context(), &bus).await;
        assert!(matches!(result, StepResult::Success { attempts: 3, .. }));

        drop(bus);
        let mut retries = 0;
        let mut logs = 0;
        while let Some(event) = rx.recv().await {
            match event {
                ExecutionEvent::StepRetrying { .. } => retries += 1,
                ExecutionEvent::StepLog { .. } => logs += 1,
                _ => {}
            }
        }
        assert_eq!(retries, 2);
        assert_eq!(logs, 3);
    }

    #[tokio::test]
    async fn test_step_exhausts_retries() {
        let bus = EventBus::default();
        let result = executor(5).execute(&step(1), &context(), &bus).await;
        match result {
            StepResult::Failed { error, attempts } => {
                assert_eq!(attempts, 2);
                assert!(error.contains("flaky"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
