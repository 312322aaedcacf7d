//! In-memory implementation of RunStore

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::activity::HeartbeatPayload;
use crate::workflow::{HistoryEvent, WorkflowEvent};

/// Internal run state
struct RunState {
    record: RunRecord,
    events: Vec<HistoryEvent>,
}

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, RunState>,
    /// Run IDs per workflow ID, oldest first
    runs_by_workflow: HashMap<String, Vec<Uuid>>,
    /// All run IDs in creation order
    creation_order: Vec<Uuid>,
}

/// In-memory implementation of RunStore
///
/// All state lives in a single lock, so run creation and the duplicate
/// check are atomic. Nothing survives a process restart.
///
/// # Example
///
/// ```
/// use cancelflow_durable::InMemoryRunStore;
///
/// let store = InMemoryRunStore::new();
/// assert_eq!(store.run_count(), 0);
/// ```
pub struct InMemoryRunStore {
    inner: RwLock<Inner>,
}

impl InMemoryRunStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Get the number of runs
    pub fn run_count(&self) -> usize {
        self.inner.read().runs.len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.runs.clear();
        inner.runs_by_workflow.clear();
        inner.creation_order.clear();
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, run: NewRun) -> Result<RunRecord, StoreError> {
        let mut inner = self.inner.write();

        let workflow_id = run.execution.workflow_id.clone();
        let latest = inner
            .runs_by_workflow
            .get(&workflow_id)
            .and_then(|ids| ids.last())
            .and_then(|id| inner.runs.get(id));
        if let Some(existing) = latest {
            if existing.record.status == WorkflowStatus::Running {
                return Err(StoreError::AlreadyRunning {
                    workflow_id,
                    run_id: existing.record.execution.run_id,
                });
            }
        }

        let now = Utc::now();
        let run_id = run.execution.run_id;
        let started = WorkflowEvent::WorkflowStarted {
            workflow_type: run.workflow_type.clone(),
            input: run.input.clone(),
        };
        let record = RunRecord::new(run, now);

        inner.runs.insert(
            run_id,
            RunState {
                record: record.clone(),
                events: vec![HistoryEvent {
                    sequence: 1,
                    recorded_at: now,
                    event: started,
                }],
            },
        );
        inner
            .runs_by_workflow
            .entry(workflow_id)
            .or_default()
            .push(run_id);
        inner.creation_order.push(run_id);

        Ok(record)
    }

    async fn get_run(&self, workflow_id: &str) -> Result<RunRecord, StoreError> {
        let inner = self.inner.read();
        inner
            .runs_by_workflow
            .get(workflow_id)
            .and_then(|ids| ids.last())
            .and_then(|id| inner.runs.get(id))
            .map(|state| state.record.clone())
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))
    }

    async fn get_run_by_id(&self, run_id: Uuid) -> Result<RunRecord, StoreError> {
        self.inner
            .read()
            .runs
            .get(&run_id)
            .map(|state| state.record.clone())
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<RunRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .creation_order
            .iter()
            .rev()
            .filter_map(|id| inner.runs.get(id))
            .filter(|state| filter.matches(&state.record))
            .map(|state| state.record.clone())
            .collect())
    }

    async fn append_event(&self, run_id: Uuid, event: WorkflowEvent) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let state = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;

        if state.record.status.is_terminal() {
            return Err(StoreError::RunClosed(run_id));
        }

        let now = Utc::now();
        let sequence = state.events.len() as u64 + 1;
        state.record.apply(&event, now);
        state.events.push(HistoryEvent {
            sequence,
            recorded_at: now,
            event,
        });

        Ok(sequence)
    }

    async fn load_events(&self, run_id: Uuid) -> Result<Vec<HistoryEvent>, StoreError> {
        self.inner
            .read()
            .runs
            .get(&run_id)
            .map(|state| state.events.clone())
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn record_heartbeat(
        &self,
        run_id: Uuid,
        activity_id: &str,
        heartbeat: &HeartbeatPayload,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let state = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;

        // Late heartbeats for closed activities are ignored
        if let Some(pending) = state.record.pending_activities.get_mut(activity_id) {
            pending.last_heartbeat_at = Some(heartbeat.recorded_at);
            pending.heartbeat_details = heartbeat.details.clone();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{
        ActivityOptions, TraceContext, WorkflowError, WorkflowExecution,
    };
    use serde_json::json;

    fn new_run(workflow_id: &str) -> NewRun {
        NewRun {
            execution: WorkflowExecution::new(workflow_id, Uuid::now_v7()),
            workflow_type: "cancel_activity".to_string(),
            task_list: "cancelGroup".to_string(),
            input: json!({"max_ticks": null}),
            trace_context: TraceContext::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_run() {
        let store = InMemoryRunStore::new();

        let record = store.create_run(new_run("wf-1")).await.unwrap();
        assert_eq!(record.status, WorkflowStatus::Running);

        let fetched = store.get_run("wf-1").await.unwrap();
        assert_eq!(fetched, record);

        let by_id = store
            .get_run_by_id(record.execution.run_id)
            .await
            .unwrap();
        assert_eq!(by_id.execution.workflow_id, "wf-1");
    }

    #[tokio::test]
    async fn test_create_run_records_started_event() {
        let store = InMemoryRunStore::new();
        let record = store.create_run(new_run("wf-1")).await.unwrap();

        let events = store.load_events(record.execution.run_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence, 1);
        assert!(matches!(
            events[0].event,
            WorkflowEvent::WorkflowStarted { .. }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_running_workflow_rejected() {
        let store = InMemoryRunStore::new();
        let first = store.create_run(new_run("wf-1")).await.unwrap();

        let result = store.create_run(new_run("wf-1")).await;
        match result {
            Err(StoreError::AlreadyRunning { workflow_id, run_id }) => {
                assert_eq!(workflow_id, "wf-1");
                assert_eq!(run_id, first.execution.run_id);
            }
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_workflow_id_reusable_after_close() {
        let store = InMemoryRunStore::new();
        let first = store.create_run(new_run("wf-1")).await.unwrap();
        store
            .append_event(
                first.execution.run_id,
                WorkflowEvent::WorkflowCompleted { result: json!(1) },
            )
            .await
            .unwrap();

        let second = store.create_run(new_run("wf-1")).await.unwrap();

        let latest = store.get_run("wf-1").await.unwrap();
        assert_eq!(latest.execution.run_id, second.execution.run_id);
        assert_eq!(store.run_count(), 2);
    }

    #[tokio::test]
    async fn test_append_after_terminal_rejected() {
        let store = InMemoryRunStore::new();
        let run_id = store.create_run(new_run("wf-1")).await.unwrap().execution.run_id;

        store
            .append_event(
                run_id,
                WorkflowEvent::WorkflowFailed {
                    error: WorkflowError::application("boom"),
                },
            )
            .await
            .unwrap();

        let result = store
            .append_event(
                run_id,
                WorkflowEvent::WorkflowCancelRequested {
                    reason: "late".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::RunClosed(id)) if id == run_id));
    }

    #[tokio::test]
    async fn test_sequences_are_gapless() {
        let store = InMemoryRunStore::new();
        let run_id = store.create_run(new_run("wf-1")).await.unwrap().execution.run_id;

        let s2 = store
            .append_event(
                run_id,
                WorkflowEvent::ActivityScheduled {
                    activity_id: "0".to_string(),
                    activity_type: "long_running".to_string(),
                    input: json!({}),
                    options: ActivityOptions::default(),
                },
            )
            .await
            .unwrap();
        let s3 = store
            .append_event(
                run_id,
                WorkflowEvent::ActivityCanceled {
                    activity_id: "0".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!((s2, s3), (2, 3));
        let sequences: Vec<u64> = store
            .load_events(run_id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_record_heartbeat_updates_pending_activity() {
        let store = InMemoryRunStore::new();
        let run_id = store.create_run(new_run("wf-1")).await.unwrap().execution.run_id;
        store
            .append_event(
                run_id,
                WorkflowEvent::ActivityScheduled {
                    activity_id: "0".to_string(),
                    activity_type: "long_running".to_string(),
                    input: json!({}),
                    options: ActivityOptions::default(),
                },
            )
            .await
            .unwrap();

        let heartbeat = HeartbeatPayload {
            recorded_at: Utc::now(),
            details: Some(json!({"ticks": 4})),
        };
        store.record_heartbeat(run_id, "0", &heartbeat).await.unwrap();
        // Unknown activity IDs are ignored
        store.record_heartbeat(run_id, "9", &heartbeat).await.unwrap();

        let record = store.get_run_by_id(run_id).await.unwrap();
        let pending = &record.pending_activities["0"];
        assert_eq!(pending.last_heartbeat_at, Some(heartbeat.recorded_at));
        assert_eq!(pending.heartbeat_details, Some(json!({"ticks": 4})));

        // Heartbeats are not history events
        assert_eq!(store.load_events(run_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_runs_filter() {
        let store = InMemoryRunStore::new();
        let done = store.create_run(new_run("wf-done")).await.unwrap();
        store
            .append_event(
                done.execution.run_id,
                WorkflowEvent::WorkflowCompleted { result: json!(null) },
            )
            .await
            .unwrap();
        store.create_run(new_run("wf-live")).await.unwrap();

        let all = store.list_runs(RunFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].execution.workflow_id, "wf-live");

        let running = store.list_runs(RunFilter::running()).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].execution.workflow_id, "wf-live");
    }

    #[tokio::test]
    async fn test_missing_run() {
        let store = InMemoryRunStore::new();

        assert!(matches!(
            store.get_run("nope").await,
            Err(StoreError::WorkflowNotFound(_))
        ));
        assert!(matches!(
            store.load_events(Uuid::now_v7()).await,
            Err(StoreError::RunNotFound(_))
        ));
    }
}
