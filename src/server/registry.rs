//! Execution registry - in-memory records flushed to disk on terminal transitions

use crate::persistence::{load_json, update_json, StateStore, StoreError};
use crate::protocol::{ExecutionQuery, ExecutionRecord, ExecutionState};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Key of the flushed records in the state store
pub const EXECUTIONS_KEY: &str = "executions.json";

/// Most finished records kept, in memory and on disk
pub const DEFAULT_RETENTION: usize = 1000;

/// Default and maximum page size of [`ExecutionRegistry::list`]
pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

/// Final fields of a finished execution
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub output: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

/// Registry of executions known to the server
///
/// All state changes go through [`ExecutionRegistry::transition`], which only
/// allows forward moves of the state machine; the first terminal transition
/// wins and later ones are rejected.
pub struct ExecutionRegistry {
    records: Mutex<HashMap<String, ExecutionRecord>>,
    store: Option<Arc<dyn StateStore>>,
    retention: usize,
}

impl ExecutionRegistry {
    /// Registry without persistence
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            store: None,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Registry reloading previously flushed records from `store`
    pub fn load(store: Arc<dyn StateStore>) -> Result<Self, StoreError> {
        let persisted: Vec<ExecutionRecord> = load_json(store.as_ref(), EXECUTIONS_KEY)?.unwrap_or_default();
        let mut records = HashMap::new();
        for mut record in persisted {
            if !record.state.is_terminal() {
                record.state = ExecutionState::Cancelled;
                record.end_time.get_or_insert_with(Utc::now);
                record.error.get_or_insert_with(|| "server restarted".to_string());
            }
            records.insert(record.id.clone(), record);
        }
        evict_finished(&mut records, DEFAULT_RETENTION);
        info!(count = records.len(), "Loaded execution history");

        Ok(Self {
            records: Mutex::new(records),
            store: Some(store),
            retention: DEFAULT_RETENTION,
        })
    }

    /// Keep at most `retention` finished records; queued and running ones are never evicted
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        evict_finished(&mut self.records(), self.retention);
        self
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, ExecutionRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of records held in memory
    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Create a queued record with a fresh id
    pub fn create(&self, agent: &str, task: &str, remote: Option<String>) -> ExecutionRecord {
        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            agent: agent.to_string(),
            task: task.to_string(),
            state: ExecutionState::Queued,
            start_time: Utc::now(),
            end_time: None,
            exit_code: None,
            output: String::new(),
            error: None,
            remote,
        };
        self.records().insert(record.id.clone(), record.clone());
        debug!(execution_id = %record.id, agent = %agent, "Execution queued");
        record
    }

    /// Drop a record that never got accepted
    pub fn discard(&self, id: &str) {
        self.records().remove(id);
    }

    pub fn get(&self, id: &str) -> Option<ExecutionRecord> {
        self.records().get(id).cloned()
    }

    /// Records matching the query, newest first
    pub fn list(&self, query: &ExecutionQuery) -> (Vec<ExecutionRecord>, usize) {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);

        let mut matching: Vec<ExecutionRecord> = self
            .records()
            .values()
            .filter(|r| query.agent.as_deref().map_or(true, |a| r.agent == a))
            .filter(|r| query.state.map_or(true, |s| r.state == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len();
        matching.truncate(limit);
        (matching, total)
    }

    /// Move `queued` to `running`
    pub fn mark_running(&self, id: &str) -> bool {
        self.transition(id, ExecutionState::Running, None)
    }

    /// Record the terminal state; returns false if already finished
    pub fn finish(&self, id: &str, state: ExecutionState, completion: Completion) -> bool {
        debug_assert!(state.is_terminal());
        self.transition(id, state, Some(completion))
    }

    fn transition(&self, id: &str, next: ExecutionState, completion: Option<Completion>) -> bool {
        let flushed = {
            let mut records = self.records();
            let Some(record) = records.get_mut(id) else {
                return false;
            };
            if !record.state.can_transition_to(next) {
                debug!(execution_id = %id, from = %record.state, to = %next, "Ignoring transition");
                return false;
            }

            record.state = next;
            if let Some(completion) = completion {
                record.output = completion.output;
                record.error = completion.error;
                record.exit_code = completion.exit_code;
            }
            if next.is_terminal() {
                record.end_time = Some(Utc::now());
                let record = record.clone();
                evict_finished(&mut records, self.retention);
                Some(record)
            } else {
                None
            }
        };

        if let Some(record) = flushed {
            info!(execution_id = %id, state = %record.state, "Execution finished");
            self.flush_in_background(vec![record]);
        }
        true
    }

    /// Cancel every queued or running execution
    pub fn cancel_pending(&self) -> usize {
        let cancelled: Vec<ExecutionRecord> = {
            let mut records = self.records();
            let now = Utc::now();
            records
                .values_mut()
                .filter(|r| !r.state.is_terminal())
                .map(|r| {
                    r.state = ExecutionState::Cancelled;
                    r.end_time = Some(now);
                    r.error = Some("server shutting down".to_string());
                    r.clone()
                })
                .collect()
        };

        if !cancelled.is_empty() {
            warn!(count = cancelled.len(), "Cancelled unfinished executions");
            if let Some(store) = &self.store {
                flush(store.as_ref(), &cancelled, self.retention);
            }
        }
        cancelled.len()
    }

    /// Persist off the async workers when running inside a runtime
    fn flush_in_background(&self, finished: Vec<ExecutionRecord>) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let retention = self.retention;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || flush(store.as_ref(), &finished, retention));
            }
            Err(_) => flush(store.as_ref(), &finished, retention),
        }
    }
}

fn flush(store: &dyn StateStore, finished: &[ExecutionRecord], retention: usize) {
    let result = update_json(store, EXECUTIONS_KEY, |records: &mut Vec<ExecutionRecord>| {
        records.retain(|r| !finished.iter().any(|f| f.id == r.id));
        records.extend(finished.iter().cloned());
        if records.len() > retention {
            records.sort_by(|a, b| a.start_time.cmp(&b.start_time));
            let excess = records.len() - retention;
            records.drain(..excess);
        }
    });
    if let Err(e) = result {
        warn!("Failed to persist executions: {}", e);
    }
}

/// Drop the oldest finished records beyond `retention`
fn evict_finished(records: &mut HashMap<String, ExecutionRecord>, retention: usize) {
    let finished = records.values().filter(|r| r.state.is_terminal()).count();
    if finished <= retention {
        return;
    }

    let mut oldest: Vec<(chrono::DateTime<Utc>, String)> = records
        .values()
        .filter(|r| r.state.is_terminal())
        .map(|r| (r.start_time, r.id.clone()))
        .collect();
    oldest.sort();
    for (_, id) in oldest.into_iter().take(finished - retention) {
        records.remove(&id);
    }
    debug!(evicted = finished - retention, "Evicted old executions");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStateStore;

    fn done(output: &str) -> Completion {
        Completion {
            output: output.to_string(),
            ..Completion::default()
        }
    }

    #[test]
    fn test_ids_are_distinct() {
        let registry = ExecutionRegistry::in_memory();
        let a = registry.create("backend", "one", None);
        let b = registry.create("backend", "two", None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_single_completion_wins() {
        let registry = ExecutionRegistry::in_memory();
        let record = registry.create("backend", "task", None);

        assert!(registry.mark_running(&record.id));
        assert!(registry.finish(&record.id, ExecutionState::Failed, Completion {
            error: Some("timeout".to_string()),
            ..Completion::default()
        }));
        assert!(!registry.finish(&record.id, ExecutionState::Completed, done("late")));
        assert!(!registry.mark_running(&record.id));

        let record = registry.get(&record.id).unwrap();
        assert_eq!(record.state, ExecutionState::Failed);
        assert_eq!(record.error.as_deref(), Some("timeout"));
        assert!(record.end_time.is_some());
    }

    #[test]
    fn test_list_filters_and_limits() {
        let registry = ExecutionRegistry::in_memory();
        for i in 0..5 {
            registry.create(if i % 2 == 0 { "a" } else { "b" }, "t", None);
        }

        let (records, total) = registry.list(&ExecutionQuery {
            agent: Some("a".to_string()),
            state: None,
            limit: Some(2),
        });
        assert_eq!(total, 3);
        assert_eq!(records.len(), 2);
        assert!(records[0].start_time >= records[1].start_time);

        let (records, _) = registry.list(&ExecutionQuery {
            state: Some(ExecutionState::Running),
            ..ExecutionQuery::default()
        });
        assert!(records.is_empty());
    }

    #[test]
    fn test_terminal_records_survive_restart() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let registry = ExecutionRegistry::load(store.clone()).unwrap();
        let finished = registry.create("backend", "t", None);
        let pending = registry.create("backend", "t", None);
        registry.mark_running(&finished.id);
        registry.finish(&finished.id, ExecutionState::Completed, done("ok"));

        let reloaded = ExecutionRegistry::load(store.clone()).unwrap();
        assert_eq!(reloaded.get(&finished.id).unwrap().output, "ok");
        assert!(reloaded.get(&pending.id).is_none());

        assert_eq!(registry.cancel_pending(), 1);
        let reloaded = ExecutionRegistry::load(store).unwrap();
        assert_eq!(
            reloaded.get(&pending.id).unwrap().state,
            ExecutionState::Cancelled
        );
    }

    #[test]
    fn test_finished_records_are_evicted_past_retention() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let registry = ExecutionRegistry::load(store.clone()).unwrap().with_retention(5);
        let running = registry.create("backend", "long job", None);
        registry.mark_running(&running.id);

        let mut finished = Vec::new();
        for i in 0..30 {
            let record = registry.create("backend", &format!("task {}", i), None);
            registry.finish(&record.id, ExecutionState::Completed, done("ok"));
            finished.push(record.id);
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        // five finished plus the one still running
        assert_eq!(registry.len(), 6);
        assert!(registry.get(&running.id).is_some());
        assert!(registry.get(&finished[0]).is_none());
        assert!(registry.get(&finished[29]).is_some());

        let persisted: Vec<ExecutionRecord> = load_json(store.as_ref(), EXECUTIONS_KEY).unwrap().unwrap();
        assert_eq!(persisted.len(), 5);
    }
}
