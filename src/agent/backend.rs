//! Agent backends - how an agent is actually invoked

use crate::agent::{
    catalog::AgentDefinition,
    protocol::{parse_line, AgentLine},
    streaming::EventSink,
    AgentError, AgentOutput,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Default agent command
pub const DEFAULT_AGENT_COMMAND: &str = "claude";

/// Most stderr kept for error reporting
const MAX_STDERR_BYTES: usize = 16 * 1024;

/// Invokes one agent on one task
///
/// Implementations run until the agent finishes; the caller enforces the
/// timeout by dropping the returned future, so anything spawned must be
/// cancelled on drop.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn invoke(
        &self,
        definition: &AgentDefinition,
        task: &str,
        env: &HashMap<String, String>,
        events: &EventSink,
    ) -> Result<AgentOutput, AgentError>;
}

/// Backend that runs the agent CLI as a subprocess
///
/// Arguments may contain the exact placeholders `{task}`, `{contract}` and
/// `{agent}`, which are replaced by the task text, the agent's contract and
/// its name.
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl Default for SubprocessBackend {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_COMMAND, default_args())
    }
}

/// Default arguments for the agent command
pub fn default_args() -> Vec<String> {
    ["-p", "{task}", "--append-system-prompt", "{contract}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl SubprocessBackend {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
        }
    }

    /// Run the agent in `dir`
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn expand_args(&self, definition: &AgentDefinition, task: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| match arg.as_str() {
                "{task}" => task.to_string(),
                "{contract}" => definition.contract.clone(),
                "{agent}" => definition.name.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

#[async_trait]
impl AgentBackend for SubprocessBackend {
    async fn invoke(
        &self,
        definition: &AgentDefinition,
        task: &str,
        env: &HashMap<String, String>,
        events: &EventSink,
    ) -> Result<AgentOutput, AgentError> {
        debug!(
            agent = %definition.name,
            command = %self.command,
            "Spawning agent subprocess with task length: {}",
            task.len()
        );

        let mut command = Command::new(&self.command);
        command
            .args(self.expand_args(definition, task))
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            AgentError::Internal(format!("Failed to spawn {}: {}", self.command, e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Internal("Agent stdout not captured".to_string()))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    match stderr.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let room = MAX_STDERR_BYTES.saturating_sub(buf.len());
                            buf.extend_from_slice(&chunk[..n.min(room)]);
                        }
                    }
                }
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut text = String::new();
        let mut result = None;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| AgentError::Internal(format!("Failed to read agent output: {}", e)))?
        {
            match parse_line(&line) {
                AgentLine::Progress(percent) => events.progress(percent).await,
                AgentLine::Log(message) => events.log(message).await,
                AgentLine::Result(output) => result = Some(output),
                AgentLine::Text(line) => {
                    events.log(line.clone()).await;
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&line);
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AgentError::Internal(format!("Failed to wait for agent: {}", e)))?;
        let stderr = match stderr_task {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        let exit_code = status.code().unwrap_or(-1);
        let output = result.unwrap_or(text);

        if !status.success() {
            warn!(
                agent = %definition.name,
                "Agent exited with code {}: {}",
                exit_code,
                stderr.trim()
            );
            return Ok(AgentOutput {
                output,
                exit_code: Some(exit_code),
                error: Some(format!(
                    "agent exited with code {}: {}",
                    exit_code,
                    stderr.trim()
                )),
            });
        }

        debug!(agent = %definition.name, "Agent returned {} bytes of output", output.len());
        Ok(AgentOutput {
            output,
            exit_code: Some(exit_code),
            error: None,
        })
    }
}
