//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod scheduler;

pub use engine::{EventBus, ExecutionEngine, ExecutionEvent};
pub use executor::{StepExecutor, StepResult};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
