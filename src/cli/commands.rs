//! CLI command definitions

use crate::adapters::Platform;
use crate::execution::SchedulingStrategy;
use crate::protocol::{AuthMode, ExecutionState};
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Pipeline subcommands
#[derive(Debug, Subcommand, Clone)]
pub enum PipelineCommand {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline file
    Validate(ValidateCommand),

    /// Show past pipeline runs
    History(HistoryCommand),
}

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the pipeline YAML or JSON file
    #[arg(short, long)]
    pub pipeline: PathBuf,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Maximum number of steps running at once
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Scheduling strategy (overrides --max-parallel)
    #[arg(long, value_enum)]
    pub strategy: Option<SchedulingStrategyArg>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print full step output
    #[arg(long)]
    pub show_output: bool,
}

/// Validate a pipeline file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the pipeline YAML or JSON file
    #[arg(short, long)]
    pub pipeline: PathBuf,

    /// Print the parsed definition as JSON
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Generate a CI workflow file
#[derive(Debug, Args, Clone)]
pub struct DeployCommand {
    /// Target CI platform
    #[arg(long, value_enum)]
    pub to: Platform,

    /// Path to the pipeline YAML or JSON file
    #[arg(short, long)]
    pub pipeline: PathBuf,

    /// Output file (defaults to the platform's standard location)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Run one agent on one task
#[derive(Debug, Args, Clone)]
pub struct TriggerCommand {
    /// Agent name
    pub agent: String,

    /// Task description
    pub task: String,

    /// Timeout in seconds
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,
}

/// Run the execution server
#[derive(Debug, Args, Clone)]
pub struct ServeCommand {
    /// Authentication mode
    #[arg(long, value_enum)]
    pub auth: Option<AuthMode>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Shared secret for hmac mode (or set AGENTFUL_SECRET)
    #[arg(long)]
    pub secret: Option<String>,

    /// Number of concurrent executions
    #[arg(long)]
    pub workers: Option<usize>,

    /// Start the server in the background
    #[arg(long, conflicts_with_all = ["stop", "status"])]
    pub daemon: bool,

    /// Stop the background server
    #[arg(long, conflicts_with = "status")]
    pub stop: bool,

    /// Show whether the background server is running
    #[arg(long)]
    pub status: bool,
}

/// Remote subcommands
#[derive(Debug, Subcommand, Clone)]
pub enum RemoteCommand {
    /// Register a remote server
    Add(RemoteAddCommand),

    /// Forget a remote server
    Remove {
        name: String,
    },

    /// List registered remotes
    List,

    /// Start an agent on a remote
    Exec(RemoteExecCommand),

    /// Show one remote execution
    Status {
        name: String,
        execution_id: String,
    },

    /// List agents available on a remote
    Agents {
        name: String,
    },

    /// List executions on a remote
    Executions(RemoteExecutionsCommand),

    /// Check that a remote is reachable
    Health {
        name: String,
    },
}

#[derive(Debug, Args, Clone)]
pub struct RemoteAddCommand {
    pub name: String,

    /// Base URL, e.g. http://gpu-box:3737
    pub url: String,

    #[arg(long, value_enum, default_value_t = AuthMode::Tailscale)]
    pub auth: AuthMode,

    /// Shared secret (hmac mode)
    #[arg(long)]
    pub secret: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RemoteExecCommand {
    /// Remote name
    pub name: String,

    /// Agent name
    pub agent: String,

    /// Task description
    pub task: String,

    /// Timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Wait for the execution to finish
    #[arg(long)]
    pub wait: bool,

    /// Seconds between status polls
    #[arg(long, default_value_t = 2)]
    pub interval: u64,
}

#[derive(Debug, Args, Clone)]
pub struct RemoteExecutionsCommand {
    /// Remote name
    pub name: String,

    #[arg(long)]
    pub agent: Option<String>,

    #[arg(long)]
    pub state: Option<ExecutionState>,

    #[arg(long)]
    pub limit: Option<usize>,
}

/// Worktree subcommands
#[derive(Debug, Subcommand, Clone)]
pub enum WorktreeCommand {
    /// Create a worktree
    Create {
        /// What the worktree is for (e.g. review, fix)
        purpose: String,

        /// Branch to check out
        branch: String,
    },

    /// List tracked worktrees
    List,

    /// Remove worktrees idle for longer than the retention window
    Cleanup {
        /// Retention in days (defaults to the project setting)
        #[arg(long)]
        retention_days: Option<u32>,
    },
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("url=http://x?a=b").unwrap(),
            ("url".to_string(), "http://x?a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }
}
