//! Worktree service - isolated git checkouts for concurrent agent work

pub mod git;
pub mod service;

pub use git::GitRunner;
pub use service::{
    is_ci_environment, sanitize_branch, validate_name, CleanupReport, WorktreeConfig,
    WorktreeService, WORKTREES_KEY,
};

use crate::persistence::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Error types for worktree operations
#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("Invalid worktree request: {0}")]
    Validation(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A tracked worktree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeRecord {
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
    pub purpose: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Contents of the tracking file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorktreeRegistry {
    #[serde(default)]
    pub active: Vec<WorktreeRecord>,
}
