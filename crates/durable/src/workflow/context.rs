//! Workflow execution context

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{ActivityOptions, WorkflowError};
use crate::activity::Activity;
use crate::engine::Engine;

/// Identifies one run of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Caller-chosen, opaque workflow ID
    pub workflow_id: String,

    /// Engine-assigned run ID
    pub run_id: Uuid,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id,
        }
    }
}

impl std::fmt::Display for WorkflowExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.run_id)
    }
}

/// Information about the running workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: String,
    pub task_list: String,
    pub started_at: DateTime<Utc>,
}

/// Correlation metadata carried from a workflow into its activities
///
/// Detached contexts keep the same trace context, so cleanup logs can be
/// correlated with the run that scheduled them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub baggage: BTreeMap<String, String>,
}

impl TraceContext {
    /// Create a trace context with a fresh trace ID
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::now_v7().simple().to_string(),
            baggage: BTreeMap::new(),
        }
    }

    /// Attach a baggage item
    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Context handed to a workflow body
///
/// The context carries the run's cancellation signal, the activity options
/// used for the next `execute_activity` call, and the trace context. Cloning
/// is cheap; clones share the cancellation token.
#[derive(Clone)]
pub struct WorkflowContext {
    info: Arc<WorkflowInfo>,
    engine: Arc<Engine>,
    cancel: CancellationToken,
    options: ActivityOptions,
    trace_context: TraceContext,
    /// Shared by every context derived from the same run, including detached ones
    activity_sequence: Arc<AtomicU64>,
    detached: bool,
}

impl WorkflowContext {
    pub(crate) fn new(
        info: WorkflowInfo,
        engine: Arc<Engine>,
        cancel: CancellationToken,
        trace_context: TraceContext,
    ) -> Self {
        Self {
            info: Arc::new(info),
            engine,
            cancel,
            options: ActivityOptions::default(),
            trace_context,
            activity_sequence: Arc::new(AtomicU64::new(0)),
            detached: false,
        }
    }

    /// Get workflow information
    pub fn info(&self) -> &WorkflowInfo {
        &self.info
    }

    /// Activity options applied by `execute_activity`
    pub fn activity_options(&self) -> &ActivityOptions {
        &self.options
    }

    /// Derive a context that schedules activities with `options`
    pub fn with_activity_options(mut self, options: ActivityOptions) -> Self {
        self.options = options;
        self
    }

    /// Trace context carried into activities
    pub fn trace_context(&self) -> &TraceContext {
        &self.trace_context
    }

    /// Check if cancellation of the run was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until cancellation of this context is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Derive a context that is not affected by this context's cancellation
    ///
    /// The detached context keeps the workflow info, activity options and
    /// trace context, but owns a fresh cancellation token. Activities
    /// scheduled through it still belong to the same run.
    pub fn detach(&self) -> WorkflowContext {
        Self {
            info: Arc::clone(&self.info),
            engine: Arc::clone(&self.engine),
            cancel: CancellationToken::new(),
            options: self.options.clone(),
            trace_context: self.trace_context.clone(),
            activity_sequence: Arc::clone(&self.activity_sequence),
            detached: true,
        }
    }

    /// Execute a typed activity and wait for its result
    pub async fn execute_activity<A: Activity>(
        &self,
        input: A::Input,
    ) -> Result<A::Output, WorkflowError> {
        let input = serde_json::to_value(input)?;
        let output = self.execute_activity_by_name(A::TYPE, input).await?;
        Ok(serde_json::from_value(output)?)
    }

    /// Execute an activity by registered type name
    pub async fn execute_activity_by_name(
        &self,
        activity_type: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        let activity_id = self.next_activity_id();
        self.engine
            .execute_activity(self, activity_id, activity_type, input)
            .await
    }

    /// Whether this context came from [`detach`](Self::detach)
    pub(crate) fn is_detached(&self) -> bool {
        self.detached
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn next_activity_id(&self) -> String {
        self.activity_sequence
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("workflow_execution", &self.info.workflow_execution)
            .field("cancelled", &self.is_cancelled())
            .field("options", &self.options)
            .finish()
    }
}
