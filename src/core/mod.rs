//! Core domain models for Pipeline
//!
//! This module defines the fundamental data structures that represent
//! pipelines, steps, and their configuration.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod step;

pub use condition::*;
pub use config::{load_pipeline, PipelineDefinition, StepDefinition};
pub use context::*;
pub use error::PipelineError;
pub use pipeline::*;
pub use state::*;
pub use step::*;
