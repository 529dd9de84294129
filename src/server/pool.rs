//! Bounded worker pool running queued executions

use crate::agent::{AgentExecutor, AgentTask, ExecuteOptions};
use crate::protocol::ExecutionState;
use crate::server::registry::{Completion, ExecutionRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Extra time past the task timeout before the watchdog fails the execution
const WATCHDOG_GRACE: Duration = Duration::from_secs(5);

/// One queued execution
#[derive(Debug, Clone)]
pub struct Job {
    pub execution_id: String,
    pub agent: String,
    pub task: String,
    pub timeout: Duration,
}

/// Why a job could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue at capacity
    Full,
    /// Pool shut down
    Closed,
}

/// Fixed set of workers draining a bounded queue
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` workers sharing a queue of `capacity` jobs
    pub fn start(
        workers: usize,
        capacity: usize,
        executor: AgentExecutor,
        registry: Arc<ExecutionRegistry>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let executor = executor.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else {
                            break;
                        };
                        run_job(worker_id, &executor, &registry, job).await;
                    }
                    debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        Self { sender, workers }
    }

    /// Queue a job without waiting
    pub fn try_enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Stop all workers, abandoning running jobs
    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_job(worker_id: usize, executor: &AgentExecutor, registry: &ExecutionRegistry, job: Job) {
    if !registry.mark_running(&job.execution_id) {
        debug!(execution_id = %job.execution_id, "Skipping job no longer queued");
        return;
    }
    info!(worker_id, execution_id = %job.execution_id, agent = %job.agent, "Running execution");

    let task = AgentTask::new(&job.execution_id, &job.agent, &job.task);
    let mut env = HashMap::new();
    env.insert("AGENTFUL_EXECUTION_ID".to_string(), job.execution_id.clone());
    let options = ExecuteOptions::with_timeout(job.timeout);

    let (state, completion) = tokio::select! {
        result = executor.execute(&task, &env, options) => match result {
            Ok(outcome) if outcome.success => (
                ExecutionState::Completed,
                Completion {
                    output: outcome.output,
                    error: None,
                    exit_code: outcome.exit_code,
                },
            ),
            Ok(outcome) => (
                ExecutionState::Failed,
                Completion {
                    output: outcome.output,
                    error: outcome.error,
                    exit_code: outcome.exit_code,
                },
            ),
            Err(e) => {
                error!(execution_id = %job.execution_id, "Execution rejected: {}", e);
                (
                    ExecutionState::Failed,
                    Completion {
                        error: Some(e.to_string()),
                        ..Completion::default()
                    },
                )
            }
        },
        _ = tokio::time::sleep(job.timeout + WATCHDOG_GRACE) => {
            warn!(execution_id = %job.execution_id, "Watchdog fired");
            (
                ExecutionState::Failed,
                Completion {
                    error: Some(crate::agent::response::TIMEOUT_ERROR.to_string()),
                    ..Completion::default()
                },
            )
        }
    };

    if !registry.finish(&job.execution_id, state, completion) {
        debug!(execution_id = %job.execution_id, "Execution already finished elsewhere");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentBackend, AgentDefinition, AgentError, AgentOutput, EventSink, InMemoryCatalog};
    use async_trait::async_trait;

    struct SlowBackend(Duration);

    #[async_trait]
    impl AgentBackend for SlowBackend {
        async fn invoke(
            &self,
            _definition: &AgentDefinition,
            task: &str,
            _env: &HashMap<String, String>,
            _events: &EventSink,
        ) -> Result<AgentOutput, AgentError> {
            tokio::time::sleep(self.0).await;
            Ok(AgentOutput::text(task.to_uppercase()))
        }
    }

    fn executor(delay: Duration) -> AgentExecutor {
        let catalog = InMemoryCatalog::new().with_agent("backend", "");
        AgentExecutor::new(Arc::new(catalog), Arc::new(SlowBackend(delay)))
    }

    fn job(registry: &ExecutionRegistry, task: &str) -> Job {
        let record = registry.create("backend", task, None);
        Job {
            execution_id: record.id,
            agent: "backend".to_string(),
            task: task.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    async fn wait_terminal(registry: &ExecutionRegistry, id: &str) -> ExecutionState {
        for _ in 0..200 {
            let state = registry.get(id).map(|r| r.state);
            if let Some(state) = state.filter(|s| s.is_terminal()) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {} never finished", id);
    }

    #[tokio::test]
    async fn test_jobs_run_to_completion() {
        let registry = Arc::new(ExecutionRegistry::in_memory());
        let pool = WorkerPool::start(2, 4, executor(Duration::from_millis(10)), registry.clone());

        let job = job(&registry, "hello");
        let id = job.execution_id.clone();
        pool.try_enqueue(job).unwrap();

        assert_eq!(wait_terminal(&registry, &id).await, ExecutionState::Completed);
        assert_eq!(registry.get(&id).unwrap().output, "HELLO");
    }

    #[tokio::test]
    async fn test_full_queue_is_rejected() {
        let registry = Arc::new(ExecutionRegistry::in_memory());
        let pool = WorkerPool::start(1, 1, executor(Duration::from_secs(2)), registry.clone());

        // First job occupies the worker, second fills the queue.
        pool.try_enqueue(job(&registry, "a")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.try_enqueue(job(&registry, "b")).unwrap();

        assert_eq!(pool.try_enqueue(job(&registry, "c")), Err(EnqueueError::Full));
    }
}
