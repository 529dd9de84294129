//! agentful - run agent pipelines locally, on remote execution servers or in CI

pub mod adapters;
pub mod agent;
pub mod cli;
pub mod core;
pub mod daemon;
pub mod execution;
pub mod persistence;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod settings;
pub mod worktree;

// Re-export commonly used types
pub use agent::{AgentError, AgentExecutor, AgentOutcome, AgentTask};
pub use core::{load_pipeline, ExecutionStatus, Pipeline, PipelineContext, PipelineDefinition, StepState};
pub use execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
pub use remote::{RemoteClient, RemoteRegistry};
pub use server::ServerConfig;
