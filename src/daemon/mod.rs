//! Daemon manager - run the execution server as a background process
//!
//! The PID file plus OS signal probing is the only source of truth: a PID
//! file naming a dead process is stale and gets removed on the next check.
//! A recycled PID that now belongs to an unrelated process is reported as
//! running; that race is accepted.

use crate::persistence::{load_json, save_json, FileStateStore, StateStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Key of the plain-text PID file
pub const PID_KEY: &str = "server.pid";

/// Key of the daemon metadata
pub const INFO_KEY: &str = "server.json";

/// Log file of the detached server, next to the PID file
pub const LOG_FILE: &str = "server.log";

const HEALTH_PROBES: u32 = 10;
const HEALTH_PROBE_DELAY: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

/// Error types for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Server already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Process error: {0}")]
    Process(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Metadata of a running daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonRecord {
    pub pid: u32,
    pub port: u16,
    pub started_at: DateTime<Utc>,
}

/// Lifecycle phase of the managed daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for DaemonPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DaemonPhase::Stopped => "stopped",
            DaemonPhase::Starting => "starting",
            DaemonPhase::Running => "running",
            DaemonPhase::Stopping => "stopping",
        })
    }
}

/// Result of a successful start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub pid: u32,
    pub port: u16,
    /// Whether `/health` answered before the probes ran out
    pub healthy: bool,
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: u32, forced: bool },
    NotRunning,
}

/// Result of a status check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running(DaemonRecord),
    Stopped,
}

/// Program the daemon runs
#[derive(Debug, Clone)]
pub struct DaemonCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl DaemonCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            working_dir: None,
        }
    }

    /// Re-run the current executable with `args`
    pub fn current_exe(args: Vec<String>) -> Result<Self, DaemonError> {
        let exe = std::env::current_exe()
            .map_err(|e| DaemonError::Process(format!("cannot determine current executable: {}", e)))?;
        Ok(Self::new(exe, args))
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Supervisor owning spawn, signals and the PID file of one project's server
pub struct DaemonManager {
    store: Arc<dyn StateStore>,
    log_path: PathBuf,
    health_probes: u32,
    probe_delay: Duration,
    stop_grace: Duration,
    phase: Mutex<DaemonPhase>,
    http: reqwest::Client,
}

impl DaemonManager {
    pub fn new(store: Arc<dyn StateStore>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            log_path: log_path.into(),
            health_probes: HEALTH_PROBES,
            probe_delay: HEALTH_PROBE_DELAY,
            stop_grace: STOP_GRACE,
            phase: Mutex::new(DaemonPhase::Stopped),
            http: reqwest::Client::new(),
        }
    }

    /// Manager for `<project>/.agentful`
    pub fn for_project(project_root: &Path) -> Self {
        let store = FileStateStore::for_project(project_root);
        let log_path = store.root().join(LOG_FILE);
        Self::new(Arc::new(store), log_path)
    }

    pub fn with_health_probes(mut self, probes: u32, delay: Duration) -> Self {
        self.health_probes = probes;
        self.probe_delay = delay;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Last phase this manager moved through
    pub fn phase(&self) -> DaemonPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: DaemonPhase) {
        let mut current = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        debug!(from = %*current, to = %phase, "Daemon phase");
        *current = phase;
    }

    /// Spawn `command` detached and record its PID
    ///
    /// A server that never answers `/health` is left running with a warning.
    pub async fn start(&self, command: &DaemonCommand, port: u16) -> Result<StartOutcome, DaemonError> {
        if let DaemonStatus::Running(record) = self.status()? {
            return Err(DaemonError::AlreadyRunning { pid: record.pid });
        }

        self.set_phase(DaemonPhase::Starting);
        let pid = match self.spawn(command) {
            Ok(pid) => pid,
            Err(e) => {
                self.set_phase(DaemonPhase::Stopped);
                return Err(e);
            }
        };
        info!(pid, port, "Spawned server daemon");

        // Claim the PID file; losing the race means another start won.
        let claimed = self
            .store
            .compare_and_swap(PID_KEY, None, Some(&pid.to_string()))?;
        if !claimed {
            terminate(pid);
            let other = self.read_pid()?.unwrap_or_default();
            self.set_phase(DaemonPhase::Running);
            return Err(DaemonError::AlreadyRunning { pid: other });
        }

        let record = DaemonRecord {
            pid,
            port,
            started_at: Utc::now(),
        };
        save_json(self.store.as_ref(), INFO_KEY, &record)?;

        let healthy = self.wait_healthy(pid, port).await;
        if healthy {
            info!(pid, port, "Server daemon is healthy");
        } else {
            warn!(
                pid,
                port,
                log = %self.log_path.display(),
                "Server daemon did not answer health checks; leaving it running"
            );
        }
        self.set_phase(DaemonPhase::Running);

        Ok(StartOutcome { pid, port, healthy })
    }

    /// SIGTERM, then SIGKILL after the grace period
    ///
    /// Stopping when nothing runs is not an error.
    pub async fn stop(&self) -> Result<StopOutcome, DaemonError> {
        let DaemonStatus::Running(record) = self.status()? else {
            self.set_phase(DaemonPhase::Stopped);
            return Ok(StopOutcome::NotRunning);
        };
        let pid = record.pid;

        self.set_phase(DaemonPhase::Stopping);
        info!(pid, "Stopping server daemon");
        send_signal(pid, libc::SIGTERM);

        let mut waited = Duration::ZERO;
        while is_alive(pid) && waited < self.stop_grace {
            tokio::time::sleep(STOP_POLL).await;
            waited += STOP_POLL;
        }

        let forced = is_alive(pid);
        if forced {
            warn!(pid, "Server daemon ignored SIGTERM; sending SIGKILL");
            kill_group(pid);
            for _ in 0..20 {
                if !is_alive(pid) {
                    break;
                }
                tokio::time::sleep(STOP_POLL).await;
            }
            if is_alive(pid) {
                warn!(pid, "Server daemon still alive after SIGKILL");
            }
        }

        self.clear()?;
        self.set_phase(DaemonPhase::Stopped);
        Ok(StopOutcome::Stopped { pid, forced })
    }

    /// Check the recorded PID by signal probing, removing a stale PID file
    pub fn status(&self) -> Result<DaemonStatus, DaemonError> {
        let Some(pid) = self.read_pid()? else {
            return Ok(DaemonStatus::Stopped);
        };

        if !is_alive(pid) {
            warn!(pid, "Removing stale PID file");
            self.clear()?;
            return Ok(DaemonStatus::Stopped);
        }

        let record = load_json::<DaemonRecord>(self.store.as_ref(), INFO_KEY)
            .ok()
            .flatten()
            .filter(|r| r.pid == pid)
            .unwrap_or(DaemonRecord {
                pid,
                port: 0,
                started_at: Utc::now(),
            });
        Ok(DaemonStatus::Running(record))
    }

    fn read_pid(&self) -> Result<Option<u32>, DaemonError> {
        let Some(raw) = self.store.get(PID_KEY)? else {
            return Ok(None);
        };
        match raw.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => Ok(Some(pid)),
            _ => {
                warn!(content = %raw.trim(), "Removing unreadable PID file");
                self.clear()?;
                Ok(None)
            }
        }
    }

    fn clear(&self) -> Result<(), DaemonError> {
        self.store.delete(PID_KEY)?;
        self.store.delete(INFO_KEY)?;
        Ok(())
    }

    fn spawn(&self, command: &DaemonCommand) -> Result<u32, DaemonError> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                DaemonError::Process(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let log = File::options()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| DaemonError::Process(format!("cannot open {}: {}", self.log_path.display(), e)))?;
        let log_stderr = log
            .try_clone()
            .map_err(|e| DaemonError::Process(format!("cannot clone log handle: {}", e)))?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_stderr)
            .process_group(0);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            DaemonError::Process(format!("cannot spawn {}: {}", command.program.display(), e))
        })?;
        let pid = child.id();

        // Reap the child so an exited daemon never lingers as a zombie that
        // still answers signal probes.
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        Ok(pid)
    }

    async fn wait_healthy(&self, pid: u32, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}/health", port);
        for attempt in 1..=self.health_probes {
            tokio::time::sleep(self.probe_delay).await;
            if !is_alive(pid) {
                warn!(pid, "Server daemon exited during startup");
                return false;
            }
            let response = self
                .http
                .get(&url)
                .timeout(self.probe_delay.max(Duration::from_millis(200)))
                .send()
                .await;
            match response {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) => debug!(attempt, status = %response.status(), "Health probe failed"),
                Err(e) => debug!(attempt, "Health probe failed: {}", e),
            }
        }
        false
    }
}

/// Whether a process with `pid` exists
pub fn is_alive(pid: u32) -> bool {
    // pid 0 would probe our own process group
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn send_signal(pid: u32, signal: libc::c_int) {
    if let Ok(pid) = libc::pid_t::try_from(pid) {
        unsafe {
            libc::kill(pid, signal);
        }
    }
}

/// SIGKILL the daemon and everything in its process group
///
/// The group is only targeted when `pid` leads it, as a spawned daemon does.
fn kill_group(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    if pid <= 0 {
        return;
    }
    unsafe {
        if libc::getpgid(pid) == pid {
            libc::killpg(pid, libc::SIGKILL);
        } else {
            libc::kill(pid, libc::SIGKILL);
        }
    }
}

fn terminate(pid: u32) {
    send_signal(pid, libc::SIGTERM);
}
