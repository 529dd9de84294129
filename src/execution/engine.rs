//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    agent::AgentExecutor,
    core::{ExecutionStatus, Pipeline, PipelineContext, SkipReason, StepState},
    execution::{ExecutionScheduler, SchedulingStrategy, StepExecutor, StepResult},
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        step_id: String,
        attempt: u32,
    },
    StepProgress {
        step_id: String,
        percent: u8,
    },
    StepLog {
        step_id: String,
        line: String,
    },
    StepRetrying {
        step_id: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    StepCompleted {
        step_id: String,
        output: String,
    },
    StepFailed {
        step_id: String,
        error: String,
    },
    StepSkipped {
        step_id: String,
        reason: SkipReason,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Fan-out of execution events to subscribers
///
/// Subscribers whose receiver was dropped are pruned on the next emit.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ExecutionEvent>>>>,
}

impl EventBus {
    /// Register a new subscriber
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Deliver an event to every live subscriber
    pub fn emit(&self, event: ExecutionEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    scheduler: ExecutionScheduler,
    executor: Arc<StepExecutor>,
    events: EventBus,
}

impl ExecutionEngine {
    pub fn new(agent: AgentExecutor, strategy: SchedulingStrategy) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            executor: Arc::new(StepExecutor::new(agent)),
            events: EventBus::default(),
        }
    }

    /// Engine honoring the pipeline's own `max_parallel`
    pub fn for_pipeline(agent: AgentExecutor, pipeline: &Pipeline) -> Self {
        Self::new(agent, SchedulingStrategy::for_pipeline(pipeline))
    }

    /// Environment passed to every agent invocation
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        let executor = StepExecutor::clone(&self.executor).with_env(env);
        self.executor = Arc::new(executor);
        self
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Run the pipeline to completion
    ///
    /// Ready steps start as soon as a parallelism slot is free. When a step
    /// finishes its outcome is appended to `context`, then blocked dependents
    /// are skipped and conditions of newly ready steps are evaluated.
    pub async fn run(&self, pipeline: &mut Pipeline, context: &mut PipelineContext) -> ExecutionStatus {
        let execution_id = pipeline.state.execution_id;
        info!(pipeline = %pipeline.name, %execution_id, "Starting pipeline execution");

        pipeline.state.start(pipeline.steps.len());
        self.events.emit(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            total_steps: pipeline.steps.len(),
        });

        let mut running: JoinSet<(String, StepResult)> = JoinSet::new();

        loop {
            self.settle(pipeline, context);

            for step_id in self.scheduler.next_steps(pipeline) {
                let Some(step) = pipeline.step_mut(&step_id) else {
                    continue;
                };
                step.state = StepState::Running {
                    started_at: Utc::now(),
                    attempt: 1,
                };

                let step = step.clone();
                let snapshot = context.clone();
                let executor = self.executor.clone();
                let events = self.events.clone();

                running.spawn(async move {
                    let id = step.id.clone();
                    // Run in a nested task so a panicking step still reports its id.
                    let handle = tokio::spawn(async move { executor.execute(&step, &snapshot, &events).await });
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(e) => StepResult::Failed {
                            error: format!("step task aborted: {}", e),
                            attempts: 1,
                        },
                    };
                    (id, result)
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            match joined {
                Ok((step_id, result)) => self.apply_result(pipeline, context, &step_id, result),
                Err(e) => error!("Step supervisor task failed: {}", e),
            }
        }

        pipeline.update_counts();
        let status = pipeline.final_status();
        if status == ExecutionStatus::Cancelled {
            warn!(pipeline = %pipeline.name, "Pipeline stopped with unfinished steps");
        }
        pipeline.state.finish(status);

        info!(pipeline = %pipeline.name, %execution_id, %status, "Pipeline finished");
        self.events
            .emit(ExecutionEvent::PipelineCompleted { execution_id, status });
        status
    }

    /// Skip blocked and condition-gated steps until nothing changes
    fn settle(&self, pipeline: &mut Pipeline, context: &mut PipelineContext) {
        loop {
            let mut skipped: Vec<(String, SkipReason)> = pipeline
                .blocked_steps()
                .into_iter()
                .map(|(step, dep)| (step, SkipReason::UpstreamFailed { step: dep }))
                .collect();

            skipped.extend(
                pipeline
                    .ready_steps()
                    .into_iter()
                    .filter(|step| {
                        step.condition
                            .as_ref()
                            .map(|condition| !condition.evaluate(context))
                            .unwrap_or(false)
                    })
                    .map(|step| (step.id.clone(), SkipReason::ConditionNotMet)),
            );

            if skipped.is_empty() {
                return;
            }

            for (step_id, reason) in skipped {
                info!(step_id = %step_id, "Skipping step: {}", reason);
                context.record_outcome(&step_id, "skipped", "");
                if let Some(step) = pipeline.step_mut(&step_id) {
                    step.state = StepState::Skipped {
                        reason: reason.clone(),
                    };
                }
                self.events.emit(ExecutionEvent::StepSkipped { step_id, reason });
            }
        }
    }

    fn apply_result(
        &self,
        pipeline: &mut Pipeline,
        context: &mut PipelineContext,
        step_id: &str,
        result: StepResult,
    ) {
        let Some(step) = pipeline.step_mut(step_id) else {
            return;
        };
        let started_at = match step.state {
            StepState::Running { started_at, .. } => started_at,
            _ => Utc::now(),
        };

        match result {
            StepResult::Success { output, attempts } => {
                info!(step_id = %step_id, attempts, "Step completed");
                context.record_outcome(step_id, "completed", &output);
                step.state = StepState::Completed {
                    output: output.clone(),
                    attempts,
                    started_at,
                    completed_at: Utc::now(),
                };
                self.events.emit(ExecutionEvent::StepCompleted {
                    step_id: step_id.to_string(),
                    output,
                });
            }
            StepResult::Failed { error, attempts } => {
                context.record_outcome(step_id, "failed", &error);
                step.state = StepState::Failed {
                    error: error.clone(),
                    attempts,
                    last_started_at: started_at,
                    failed_at: Utc::now(),
                };
                self.events.emit(ExecutionEvent::StepFailed {
                    step_id: step_id.to_string(),
                    error,
                });
            }
        }

        pipeline.update_counts();
    }
}
