//! Registry of workflow and activity implementations
//!
//! The registry maps type names to type-erased implementations that take and
//! return JSON, so the worker can run them without knowing concrete types.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::activity::{error_types, Activity, ActivityContext, ActivityError};
use crate::workflow::{Workflow, WorkflowContext, WorkflowError};

/// Type-erased workflow interface
#[async_trait]
pub(crate) trait AnyWorkflow: Send + Sync {
    /// Run the workflow body on JSON input
    async fn run(&self, ctx: WorkflowContext, input: Value) -> Result<Value, WorkflowError>;
}

/// Wrapper to implement AnyWorkflow for any Workflow
struct WorkflowWrapper<W: Workflow> {
    inner: W,
}

#[async_trait]
impl<W: Workflow> AnyWorkflow for WorkflowWrapper<W> {
    async fn run(&self, ctx: WorkflowContext, input: Value) -> Result<Value, WorkflowError> {
        let input: W::Input = serde_json::from_value(input)?;
        let output = self.inner.run(ctx, input).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Type-erased activity interface
#[async_trait]
pub(crate) trait AnyActivity: Send + Sync {
    /// Execute the activity on JSON input
    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError>;
}

/// Wrapper to implement AnyActivity for any Activity
struct ActivityWrapper<A: Activity> {
    inner: A,
}

#[async_trait]
impl<A: Activity> AnyActivity for ActivityWrapper<A> {
    async fn execute(&self, ctx: &ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let input: A::Input = serde_json::from_value(input).map_err(|e| {
            ActivityError::new(format!("failed to deserialize activity input: {e}"))
                .with_type(error_types::INVALID_INPUT)
        })?;

        let output = self.inner.execute(ctx, input).await?;

        serde_json::to_value(output).map_err(|e| {
            ActivityError::new(format!("failed to serialize activity output: {e}"))
                .with_type(error_types::INVALID_OUTPUT)
        })
    }
}

/// Registry of workflows and activities served by a worker
///
/// Registration is explicit: a worker only runs what was registered on the
/// registry it was built with.
///
/// # Example
///
/// ```ignore
/// let mut registry = Registry::new();
/// registry
///     .register_workflow(OrderWorkflow)
///     .register_activity(ChargeCard::new(gateway));
///
/// let worker = Worker::new(&client, "orders", registry, WorkerConfig::default());
/// ```
#[derive(Clone, Default)]
pub struct Registry {
    workflows: HashMap<String, Arc<dyn AnyWorkflow>>,
    activities: HashMap<String, Arc<dyn AnyActivity>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow implementation under `W::TYPE`
    pub fn register_workflow<W: Workflow>(&mut self, workflow: W) -> &mut Self {
        self.workflows.insert(
            W::TYPE.to_string(),
            Arc::new(WorkflowWrapper { inner: workflow }),
        );
        self
    }

    /// Register an activity implementation under `A::TYPE`
    pub fn register_activity<A: Activity>(&mut self, activity: A) -> &mut Self {
        self.activities.insert(
            A::TYPE.to_string(),
            Arc::new(ActivityWrapper { inner: activity }),
        );
        self
    }

    /// Check if a workflow type is registered
    pub fn contains_workflow(&self, workflow_type: &str) -> bool {
        self.workflows.contains_key(workflow_type)
    }

    /// Check if an activity type is registered
    pub fn contains_activity(&self, activity_type: &str) -> bool {
        self.activities.contains_key(activity_type)
    }

    /// Get all registered workflow type names
    pub fn workflow_types(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(|s| s.as_str())
    }

    /// Get all registered activity type names
    pub fn activity_types(&self) -> impl Iterator<Item = &str> {
        self.activities.keys().map(|s| s.as_str())
    }

    pub(crate) fn workflow(&self, workflow_type: &str) -> Result<Arc<dyn AnyWorkflow>, RegistryError> {
        self.workflows
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownWorkflowType(workflow_type.to_string()))
    }

    pub(crate) fn activity(&self, activity_type: &str) -> Result<Arc<dyn AnyActivity>, RegistryError> {
        self.activities
            .get(activity_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownActivityType(activity_type.to_string()))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("workflow_types", &self.workflows.keys().collect::<Vec<_>>())
            .field("activity_types", &self.activities.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry lookups
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Workflow type not registered
    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    /// Activity type not registered
    #[error("unknown activity type: {0}")]
    UnknownActivityType(String),
}

impl From<RegistryError> for WorkflowError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownWorkflowType(workflow_type) => {
                WorkflowError::UnknownWorkflowType { workflow_type }
            }
            RegistryError::UnknownActivityType(_) => WorkflowError::application(err.to_string()),
        }
    }
}

impl From<RegistryError> for ActivityError {
    fn from(err: RegistryError) -> Self {
        ActivityError::new(err.to_string()).with_type(error_types::UNKNOWN_ACTIVITY_TYPE)
    }
}
