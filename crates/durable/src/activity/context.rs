//! Activity execution context

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::workflow::{TraceContext, WorkflowExecution};

/// Liveness marker sent by a running activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatPayload {
    /// When the heartbeat was recorded
    pub recorded_at: DateTime<Utc>,

    /// Optional progress details
    pub details: Option<serde_json::Value>,
}

/// Error from heartbeat operations
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    /// Heartbeat channel closed (the caller stopped waiting, e.g. after a timeout)
    #[error("heartbeat channel closed")]
    ChannelClosed,

    /// Activity was cancelled
    #[error("activity was cancelled")]
    Cancelled,
}

/// Static information about one activity invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityInfo {
    /// Run that scheduled the activity
    pub workflow_execution: WorkflowExecution,

    /// Activity ID within the run
    pub activity_id: String,

    /// Registered activity type
    pub activity_type: String,

    /// Task list the activity was dispatched on
    pub task_list: String,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// When the activity was scheduled
    pub scheduled_at: DateTime<Utc>,

    /// When a worker picked the activity up
    pub started_at: DateTime<Utc>,

    /// Maximum gap between heartbeats, if the caller requires them
    pub heartbeat_timeout: Option<Duration>,

    /// Maximum execution time
    pub start_to_close_timeout: Duration,
}

/// Context provided to activities during execution
///
/// The context provides:
/// - Information about the current invocation
/// - Heartbeat functionality for long-running activities
/// - Cancellation detection
///
/// # Example
///
/// ```ignore
/// async fn execute(&self, ctx: &ActivityContext, input: Input) -> Result<Output, ActivityError> {
///     let mut ticker = tokio::time::interval(Duration::from_secs(1));
///     loop {
///         tokio::select! {
///             _ = ctx.cancelled() => return Ok(Output::Cancelled),
///             _ = ticker.tick() => {
///                 ctx.heartbeat(None).await.ok();
///             }
///         }
///     }
/// }
/// ```
#[derive(Debug)]
pub struct ActivityContext {
    info: ActivityInfo,

    trace_context: TraceContext,

    /// Heartbeat sender
    heartbeat_tx: Option<mpsc::Sender<HeartbeatPayload>>,

    /// Cancellation signal (a child of the scheduling workflow's token)
    cancel: CancellationToken,

    deadline: Option<Instant>,
}

impl ActivityContext {
    /// Create a new standalone activity context
    ///
    /// The context has its own cancellation token and no heartbeat channel.
    pub fn new(info: ActivityInfo) -> Self {
        Self {
            info,
            trace_context: TraceContext::new(),
            heartbeat_tx: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Create a context with heartbeat support
    pub fn with_heartbeat(mut self, tx: mpsc::Sender<HeartbeatPayload>) -> Self {
        self.heartbeat_tx = Some(tx);
        self
    }

    /// Bind the context to an existing cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Carry the scheduling workflow's trace context
    pub fn with_trace_context(mut self, trace_context: TraceContext) -> Self {
        self.trace_context = trace_context;
        self
    }

    /// Set the execution deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Information about this invocation
    pub fn info(&self) -> &ActivityInfo {
        &self.info
    }

    /// Trace context inherited from the workflow
    pub fn trace_context(&self) -> &TraceContext {
        &self.trace_context
    }

    /// Get a handle that can be used to cancel this activity
    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Record a heartbeat
    ///
    /// Heartbeats keep the activity alive (prevent heartbeat timeout) and
    /// report progress to the workflow engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the activity has been cancelled or the
    /// heartbeat channel is closed.
    pub async fn heartbeat(
        &self,
        details: Option<serde_json::Value>,
    ) -> Result<(), HeartbeatError> {
        if self.is_cancelled() {
            return Err(HeartbeatError::Cancelled);
        }

        if let Some(tx) = &self.heartbeat_tx {
            tx.send(HeartbeatPayload {
                recorded_at: Utc::now(),
                details,
            })
            .await
            .map_err(|_| HeartbeatError::ChannelClosed)?;
        }

        Ok(())
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until cancellation is requested
    ///
    /// Resolves immediately if the activity is already cancelled. Intended for
    /// `select!` against the activity's own work.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Remaining time before the start-to-close deadline
    pub fn remaining_time(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// Handle to cancel an activity
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancel: CancellationToken,
}

impl CancellationHandle {
    /// Cancel the activity
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
