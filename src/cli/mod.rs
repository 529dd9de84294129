//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    DeployCommand, PipelineCommand, RemoteCommand, ServeCommand, TriggerCommand, WorktreeCommand,
};
use std::ffi::OsString;
use std::path::PathBuf;

/// Agent pipelines, remote execution and worktree isolation
#[derive(Debug, Parser, Clone)]
#[command(name = "agentful")]
#[command(version)]
#[command(about = "Run agent pipelines locally, on remote servers or in CI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project root (defaults to the current directory)
    #[arg(short = 'C', long, global = true)]
    pub project: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run, validate or inspect pipelines
    #[command(subcommand)]
    Pipeline(PipelineCommand),

    /// Generate a CI workflow from a pipeline
    Deploy(DeployCommand),

    /// Run one agent on one task
    Trigger(TriggerCommand),

    /// Run the execution server
    Serve(ServeCommand),

    /// Manage and use remote execution servers
    #[command(subcommand)]
    Remote(RemoteCommand),

    /// Manage isolated git worktrees
    #[command(subcommand)]
    Worktree(WorktreeCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// Project root the command works on
    pub fn project_root(&self) -> std::io::Result<PathBuf> {
        match &self.project {
            Some(path) => Ok(path.clone()),
            None => std::env::current_dir(),
        }
    }
}
