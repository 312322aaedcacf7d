//! Workflow trait definition

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{TimeoutType, WorkflowContext};
use crate::activity::ActivityError;

/// Error type for workflow failures
///
/// Returned by [`WorkflowContext::execute_activity`] and by workflow bodies.
/// Cancellation of an activity that reports its own sentinel result is not
/// represented here; only an abandoned wait is (`Canceled`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowError {
    /// The activity returned an error
    #[error("activity {activity_type} ({activity_id}) failed: {error}")]
    ActivityFailed {
        activity_id: String,
        activity_type: String,
        error: ActivityError,
    },

    /// The activity exceeded one of its timeouts
    #[error("activity {activity_type} ({activity_id}) timed out: {timeout_type}")]
    ActivityTimedOut {
        activity_id: String,
        activity_type: String,
        timeout_type: TimeoutType,
    },

    /// The context was cancelled and the caller did not wait for the activity
    #[error("canceled")]
    Canceled,

    /// No workflow with the requested type is registered on the worker
    #[error("unknown workflow type: {workflow_type}")]
    UnknownWorkflowType { workflow_type: String },

    /// Input or output could not be (de)serialized
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// The workflow body panicked
    #[error("workflow panicked: {message}")]
    Panicked { message: String },

    /// The engine stopped before the activity could finish
    #[error("engine is shutting down")]
    EngineShutdown,

    /// The run history could not be updated
    #[error("store error: {message}")]
    Store { message: String },

    /// Error raised by workflow code
    #[error("{message}")]
    Application { message: String },
}

impl WorkflowError {
    /// Create an application error
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
        }
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ActivityTimedOut { .. })
    }

    /// Timeout type, if this error is a timeout
    pub fn timeout_type(&self) -> Option<TimeoutType> {
        match self {
            Self::ActivityTimedOut { timeout_type, .. } => Some(*timeout_type),
            _ => None,
        }
    }

    /// Check if this error reports an abandoned wait after cancellation
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// A workflow is an async orchestration function run by a worker
///
/// The body sequences activities through its [`WorkflowContext`]. The run
/// succeeds when `run` returns `Ok`, and fails with the returned error
/// otherwise.
///
/// # Example
///
/// ```ignore
/// use cancelflow_durable::prelude::*;
///
/// struct OrderWorkflow;
///
/// #[async_trait]
/// impl Workflow for OrderWorkflow {
///     const TYPE: &'static str = "order_workflow";
///     type Input = OrderInput;
///     type Output = OrderResult;
///
///     async fn run(&self, ctx: WorkflowContext, input: OrderInput) -> Result<OrderResult, WorkflowError> {
///         let receipt = ctx.execute_activity::<ChargeCard>(input.payment).await?;
///         Ok(OrderResult { receipt })
///     }
/// }
/// ```
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Unique type identifier for this workflow
    ///
    /// This is used to look up the workflow in the registry.
    const TYPE: &'static str;

    /// Input type for starting the workflow
    type Input: Serialize + DeserializeOwned + Send;

    /// Output type when workflow completes successfully
    type Output: Serialize + DeserializeOwned + Send;

    /// Run the workflow body
    async fn run(
        &self,
        ctx: WorkflowContext,
        input: Self::Input,
    ) -> Result<Self::Output, WorkflowError>;
}
