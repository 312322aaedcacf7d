//! Client for starting, cancelling and inspecting workflow runs

use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use super::executor::{not_found, Engine};
use crate::persistence::{InMemoryRunStore, RunFilter, RunRecord, RunStore, StoreError, WorkflowStatus};
use crate::workflow::{HistoryEvent, TraceContext, Workflow, WorkflowError, WorkflowExecution};

/// Errors from client operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// No run exists for the workflow ID
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A run with the same workflow ID is still open
    #[error("workflow {workflow_id} is already running (run {run_id})")]
    WorkflowAlreadyRunning { workflow_id: String, run_id: Uuid },

    /// The run already finished
    #[error("workflow {workflow_id} is already {status}")]
    WorkflowClosed {
        workflow_id: String,
        status: WorkflowStatus,
    },

    /// The run finished with an error
    #[error("workflow failed: {0}")]
    WorkflowFailed(WorkflowError),

    /// The engine no longer accepts work
    #[error("engine is shut down")]
    Shutdown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Check if the error is a missing workflow
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::WorkflowNotFound(_) | Self::Store(StoreError::RunNotFound(_))
        )
    }
}

/// Options for starting a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartWorkflowOptions {
    /// Workflow ID (generated if not provided)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    /// Task list the run is dispatched on
    pub task_list: String,

    /// Trace context to carry into the run (generated if not provided)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_context: Option<TraceContext>,
}

impl StartWorkflowOptions {
    pub fn new(task_list: impl Into<String>) -> Self {
        Self {
            workflow_id: None,
            task_list: task_list.into(),
            trace_context: None,
        }
    }

    /// Use a caller-chosen workflow ID
    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    /// Propagate an existing trace context
    pub fn with_trace_context(mut self, trace_context: TraceContext) -> Self {
        self.trace_context = Some(trace_context);
        self
    }
}

/// Handle to a workflow engine
///
/// Clients are cheap to clone and share one engine. Workers are built from a
/// client, so runs started through any clone are served by them.
///
/// # Example
///
/// ```ignore
/// let client = Client::in_memory();
/// let execution = client
///     .start::<OrderWorkflow>(StartWorkflowOptions::new("orders"), input)
///     .await?;
///
/// client.cancel_workflow(&execution.workflow_id, "customer asked").await?;
/// let output: OrderResult = client.await_result(&execution.workflow_id).await?;
/// ```
#[derive(Clone)]
pub struct Client {
    engine: Arc<Engine>,
}

impl Client {
    /// Create a client backed by the given store
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            engine: Arc::new(Engine::new(store)),
        }
    }

    /// Create a client backed by an in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRunStore::new()))
    }

    pub(crate) fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Start a typed workflow
    pub async fn start<W: Workflow>(
        &self,
        options: StartWorkflowOptions,
        input: W::Input,
    ) -> Result<WorkflowExecution, EngineError> {
        let input = serde_json::to_value(input)?;
        self.start_workflow(options, W::TYPE, input).await
    }

    /// Start a workflow by registered type name
    pub async fn start_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow_type: &str,
        input: serde_json::Value,
    ) -> Result<WorkflowExecution, EngineError> {
        self.engine.start_run(options, workflow_type, input).await
    }

    /// Request cancellation of the latest run of a workflow
    ///
    /// Returns the run record after the request was recorded. Fails with
    /// [`EngineError::WorkflowClosed`] if the run already finished.
    pub async fn cancel_workflow(
        &self,
        workflow_id: &str,
        reason: &str,
    ) -> Result<RunRecord, EngineError> {
        self.engine.cancel_run(workflow_id, reason).await
    }

    /// Describe the latest run of a workflow
    pub async fn describe_workflow(&self, workflow_id: &str) -> Result<RunRecord, EngineError> {
        self.engine
            .store()
            .get_run(workflow_id)
            .await
            .map_err(not_found)
    }

    /// Load the history of the latest run of a workflow
    pub async fn get_history(&self, workflow_id: &str) -> Result<Vec<HistoryEvent>, EngineError> {
        let record = self.describe_workflow(workflow_id).await?;
        Ok(self
            .engine
            .store()
            .load_events(record.execution.run_id)
            .await?)
    }

    /// List runs, most recently started first
    pub async fn list_workflows(&self, filter: RunFilter) -> Result<Vec<RunRecord>, EngineError> {
        Ok(self.engine.store().list_runs(filter).await?)
    }

    /// Wait for the latest run of a workflow to finish and return its output
    #[instrument(skip(self))]
    pub async fn await_result<T: DeserializeOwned>(&self, workflow_id: &str) -> Result<T, EngineError> {
        let record = self.describe_workflow(workflow_id).await?;
        let run_id = record.execution.run_id;

        let record = if record.status.is_terminal() {
            record
        } else {
            if let Some(mut outcome) = self.engine.subscribe(run_id) {
                // A closed channel means the outcome was already recorded
                let _ = outcome.wait_for(|o| o.is_some()).await;
            }
            self.engine.store().get_run_by_id(run_id).await?
        };

        match record.status {
            WorkflowStatus::Completed => Ok(serde_json::from_value(
                record.result.unwrap_or(serde_json::Value::Null),
            )?),
            WorkflowStatus::Failed => Err(EngineError::WorkflowFailed(
                record.error.unwrap_or_else(|| WorkflowError::application("unknown failure")),
            )),
            WorkflowStatus::Running => Err(EngineError::Shutdown),
        }
    }

    /// Stop accepting new runs and release pending activity waits
    ///
    /// Runs still waiting for a worker fail with
    /// [`WorkflowError::EngineShutdown`].
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("shutdown", &self.engine.is_shutdown())
            .finish()
    }
}
