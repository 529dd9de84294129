//! Execution scheduler - determines which steps to run next

use crate::core::Pipeline;

/// Strategy for scheduling step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute steps in dependency order, one at a time
    #[default]
    Sequential,

    /// Execute all ready steps in parallel
    Parallel,

    /// Limited parallelism (max N concurrent steps)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Strategy honoring a pipeline's `max_parallel`
    pub fn for_pipeline(pipeline: &Pipeline) -> Self {
        match pipeline.max_parallel {
            0 | 1 => SchedulingStrategy::Sequential,
            n => SchedulingStrategy::LimitedParallel(n),
        }
    }

    fn limit(&self) -> Option<usize> {
        match self {
            SchedulingStrategy::Sequential => Some(1),
            SchedulingStrategy::Parallel => None,
            SchedulingStrategy::LimitedParallel(max) => Some((*max).max(1)),
        }
    }
}

/// Scheduler for determining which steps to run
#[derive(Debug, Clone, Default)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Get the next batch of steps to start
    ///
    /// Steps already running count against the parallelism limit.
    pub fn next_steps(&self, pipeline: &Pipeline) -> Vec<String> {
        let ready = pipeline.ready_steps().into_iter().map(|s| s.id.clone());

        match self.strategy.limit() {
            None => ready.collect(),
            Some(max) => {
                let remaining = max.saturating_sub(pipeline.running_steps().len());
                ready.take(remaining).collect()
            }
        }
    }
}
