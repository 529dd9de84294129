//! Outbound event stream for agent execution
//!
//! Backends report progress and log lines through an [`EventSink`]; callers
//! consume them from the receiving half of a bounded channel, so a slow
//! consumer applies backpressure to the agent instead of events piling up.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default capacity of an agent event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Event emitted while an agent runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Progress percentage (0-100, non-decreasing)
    Progress(u8),
    /// Log line
    Log(String),
}

/// Sending half handed to backends
///
/// A sink without a channel discards everything. Progress never decreases:
/// values below the last reported one are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::Sender<AgentEvent>>,
    last_progress: Arc<AtomicU8>,
}

impl EventSink {
    pub fn new(sender: Option<mpsc::Sender<AgentEvent>>) -> Self {
        Self {
            sender,
            last_progress: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Sink that drops every event
    pub fn discard() -> Self {
        Self::default()
    }

    /// Report progress
    pub async fn progress(&self, percent: u8) {
        let percent = percent.min(100);
        let previous = self.last_progress.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            self.send(AgentEvent::Progress(percent)).await;
        }
    }

    /// Report a log line
    pub async fn log(&self, line: impl Into<String>) {
        self.send(AgentEvent::Log(line.into())).await;
    }

    /// Last progress value reported
    pub fn current_progress(&self) -> u8 {
        self.last_progress.load(Ordering::SeqCst)
    }

    async fn send(&self, event: AgentEvent) {
        if let Some(sender) = &self.sender {
            // A dropped receiver just means nobody is listening.
            let _ = sender.send(event).await;
        }
    }
}

/// Create a connected sink and receiver
pub fn event_channel(capacity: usize) -> (EventSink, mpsc::Receiver<AgentEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink::new(Some(tx)), rx)
}
