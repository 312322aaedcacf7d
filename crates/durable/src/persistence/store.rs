//! RunStore trait definition

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activity::HeartbeatPayload;
use crate::workflow::{
    HistoryEvent, TraceContext, WorkflowError, WorkflowEvent, WorkflowExecution,
};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No run exists for the workflow ID
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Run not found
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    /// A run with the same workflow ID is still running
    #[error("workflow {workflow_id} is already running (run {run_id})")]
    AlreadyRunning { workflow_id: String, run_id: Uuid },

    /// The run already reached a terminal state
    #[error("run {0} is closed")]
    RunClosed(Uuid),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Workflow run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Run is in progress
    Running,

    /// Workflow body returned successfully
    Completed,

    /// Workflow body returned an error or panicked
    Failed,
}

impl WorkflowStatus {
    /// Whether the run has finished
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

/// Lifecycle state of an activity that has not closed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingActivityState {
    Scheduled,
    Started,
    CancelRequested,
}

/// An activity that was scheduled and has not closed yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingActivity {
    pub activity_id: String,
    pub activity_type: String,
    pub state: PendingActivityState,
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub heartbeat_details: Option<serde_json::Value>,
}

/// Definition of a run to be created
#[derive(Debug, Clone)]
pub struct NewRun {
    pub execution: WorkflowExecution,
    pub workflow_type: String,
    pub task_list: String,
    pub input: serde_json::Value,
    pub trace_context: TraceContext,
}

/// Current state of a run, derived from its history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub execution: WorkflowExecution,
    pub workflow_type: String,
    pub task_list: String,
    pub input: serde_json::Value,
    pub status: WorkflowStatus,

    /// Reason given by the first cancellation request, if any
    pub cancel_requested: Option<String>,

    pub result: Option<serde_json::Value>,
    pub error: Option<WorkflowError>,
    pub trace_context: TraceContext,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,

    /// Activities that have not closed, keyed by activity ID
    #[serde(default)]
    pub pending_activities: BTreeMap<String, PendingActivity>,
}

impl RunRecord {
    /// Create the record of a freshly started run
    pub fn new(run: NewRun, started_at: DateTime<Utc>) -> Self {
        Self {
            execution: run.execution,
            workflow_type: run.workflow_type,
            task_list: run.task_list,
            input: run.input,
            status: WorkflowStatus::Running,
            cancel_requested: None,
            result: None,
            error: None,
            trace_context: run.trace_context,
            started_at,
            closed_at: None,
            pending_activities: BTreeMap::new(),
        }
    }

    /// Fold one history event into the record
    pub fn apply(&mut self, event: &WorkflowEvent, at: DateTime<Utc>) {
        match event {
            WorkflowEvent::WorkflowStarted { .. } => {}
            WorkflowEvent::WorkflowCancelRequested { reason } => {
                if self.cancel_requested.is_none() {
                    self.cancel_requested = Some(reason.clone());
                }
            }
            WorkflowEvent::WorkflowCompleted { result } => {
                self.status = WorkflowStatus::Completed;
                self.result = Some(result.clone());
                self.closed_at = Some(at);
            }
            WorkflowEvent::WorkflowFailed { error } => {
                self.status = WorkflowStatus::Failed;
                self.error = Some(error.clone());
                self.closed_at = Some(at);
            }
            WorkflowEvent::ActivityScheduled {
                activity_id,
                activity_type,
                ..
            } => {
                self.pending_activities.insert(
                    activity_id.clone(),
                    PendingActivity {
                        activity_id: activity_id.clone(),
                        activity_type: activity_type.clone(),
                        state: PendingActivityState::Scheduled,
                        attempt: 0,
                        scheduled_at: at,
                        started_at: None,
                        last_heartbeat_at: None,
                        heartbeat_details: None,
                    },
                );
            }
            WorkflowEvent::ActivityStarted {
                activity_id,
                attempt,
                ..
            } => {
                if let Some(pending) = self.pending_activities.get_mut(activity_id) {
                    pending.state = PendingActivityState::Started;
                    pending.attempt = *attempt;
                    pending.started_at = Some(at);
                }
            }
            WorkflowEvent::ActivityCancelRequested { activity_id } => {
                if let Some(pending) = self.pending_activities.get_mut(activity_id) {
                    pending.state = PendingActivityState::CancelRequested;
                }
            }
            WorkflowEvent::ActivityCompleted { activity_id, .. }
            | WorkflowEvent::ActivityFailed { activity_id, .. }
            | WorkflowEvent::ActivityTimedOut { activity_id, .. }
            | WorkflowEvent::ActivityCanceled { activity_id } => {
                self.pending_activities.remove(activity_id);
            }
        }
    }
}

/// Filter for listing runs
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<WorkflowStatus>,
    pub workflow_type: Option<String>,
}

impl RunFilter {
    pub fn running() -> Self {
        Self {
            status: Some(WorkflowStatus::Running),
            workflow_type: None,
        }
    }

    /// Check whether a record passes the filter
    pub fn matches(&self, record: &RunRecord) -> bool {
        self.status.map_or(true, |status| record.status == status)
            && self
                .workflow_type
                .as_deref()
                .map_or(true, |workflow_type| record.workflow_type == workflow_type)
    }
}

/// Store for workflow runs and their append-only history
///
/// Implementations must keep the per-run event sequence gapless and reject
/// appends to a run that already recorded a terminal event.
#[async_trait]
pub trait RunStore: Send + Sync + 'static {
    // =========================================================================
    // Run Operations
    // =========================================================================

    /// Create a run and record its `WorkflowStarted` event
    ///
    /// Fails with [`StoreError::AlreadyRunning`] if the latest run for the
    /// same workflow ID has not closed yet.
    async fn create_run(&self, run: NewRun) -> Result<RunRecord, StoreError>;

    /// Get the latest run for a workflow ID
    async fn get_run(&self, workflow_id: &str) -> Result<RunRecord, StoreError>;

    /// Get a run by its run ID
    async fn get_run_by_id(&self, run_id: Uuid) -> Result<RunRecord, StoreError>;

    /// List runs, most recently started first
    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<RunRecord>, StoreError>;

    // =========================================================================
    // History Operations
    // =========================================================================

    /// Append an event to a run's history
    ///
    /// Returns the event's 1-based sequence number.
    async fn append_event(&self, run_id: Uuid, event: WorkflowEvent) -> Result<u64, StoreError>;

    /// Load all events for a run, in order
    async fn load_events(&self, run_id: Uuid) -> Result<Vec<HistoryEvent>, StoreError>;

    /// Record the latest heartbeat of a pending activity
    ///
    /// Heartbeats update the run record only; they are not history events.
    async fn record_heartbeat(
        &self,
        run_id: Uuid,
        activity_id: &str,
        heartbeat: &HeartbeatPayload,
    ) -> Result<(), StoreError>;
}
