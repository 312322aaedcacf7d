//! Worker that runs workflow bodies and activities from one task list
//!
//! Manages concurrent execution with a bounded number of activity slots and
//! graceful shutdown.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::activity::{error_types, ActivityContext, ActivityError, ActivityInfo};
use crate::engine::{ActivityTask, Client, Engine, Registry, TaskList, WorkflowTask};
use crate::workflow::{panic_message, WorkflowContext, WorkflowError};

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Unique worker ID (generated if not provided)
    pub worker_id: String,

    /// Maximum concurrent activity executions
    pub max_concurrent_activities: usize,

    /// Graceful shutdown timeout
    #[serde(with = "crate::workflow::millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            max_concurrent_activities: 10,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set maximum concurrent activities
    pub fn with_max_concurrent_activities(mut self, max: usize) -> Self {
        self.max_concurrent_activities = max.max(1);
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Worker was created but not started
    Idle,
    /// Worker is polling its task list
    Running,
    /// Worker stopped polling and is waiting for in-flight work
    Draining,
    /// Worker has stopped
    Stopped,
}

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Worker already running
    #[error("worker is already running")]
    AlreadyRunning,

    /// Worker was shut down and cannot be restarted
    #[error("worker has been shut down")]
    AlreadyStopped,

    /// Shutdown timeout
    #[error("graceful shutdown timed out with {remaining} tasks still running")]
    ShutdownTimeout { remaining: usize },
}

/// Worker serving one task list
///
/// The worker runs every workflow task it receives on its own tokio task,
/// and up to `max_concurrent_activities` activities at a time.
///
/// # Example
///
/// ```ignore
/// let mut registry = Registry::new();
/// registry.register_workflow(MyWorkflow).register_activity(MyActivity);
///
/// let worker = Worker::new(&client, "my-task-list", registry, WorkerConfig::default());
/// worker.start()?;
///
/// // ... later, graceful shutdown
/// worker.shutdown().await?;
/// ```
pub struct Worker {
    engine: Arc<Engine>,
    task_list: Arc<TaskList>,
    registry: Arc<Registry>,
    config: WorkerConfig,
    stop_workflows: CancellationToken,
    stop_activities: CancellationToken,
    status: RwLock<WorkerStatus>,
    activity_slots: Arc<Semaphore>,
    workflows: TaskTracker,
    activities: TaskTracker,
    workflow_poller: Mutex<Option<JoinHandle<()>>>,
    activity_poller: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Create a worker for `task_list` on the client's engine
    pub fn new(
        client: &Client,
        task_list: impl Into<String>,
        registry: Registry,
        config: WorkerConfig,
    ) -> Self {
        let engine = Arc::clone(client.engine());
        let task_list = engine.task_list(&task_list.into());
        let max_concurrent = config.max_concurrent_activities.max(1);

        Self {
            engine,
            task_list,
            registry: Arc::new(registry),
            config,
            stop_workflows: CancellationToken::new(),
            stop_activities: CancellationToken::new(),
            status: RwLock::new(WorkerStatus::Idle),
            activity_slots: Arc::new(Semaphore::new(max_concurrent)),
            workflows: TaskTracker::new(),
            activities: TaskTracker::new(),
            workflow_poller: Mutex::new(None),
            activity_poller: Mutex::new(None),
        }
    }

    /// Start polling the task list
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id, task_list = %self.task_list.name()))]
    pub fn start(&self) -> Result<(), WorkerError> {
        {
            let mut status = self.status.write();
            match *status {
                WorkerStatus::Running => return Err(WorkerError::AlreadyRunning),
                WorkerStatus::Draining | WorkerStatus::Stopped => {
                    return Err(WorkerError::AlreadyStopped)
                }
                WorkerStatus::Idle => *status = WorkerStatus::Running,
            }
        }

        info!(
            workflow_types = ?self.registry.workflow_types().collect::<Vec<_>>(),
            activity_types = ?self.registry.activity_types().collect::<Vec<_>>(),
            max_concurrent_activities = self.config.max_concurrent_activities,
            "Starting worker"
        );

        *self.workflow_poller.lock() = Some(self.start_workflow_loop());
        *self.activity_poller.lock() = Some(self.start_activity_loop());

        Ok(())
    }

    /// Stop polling and wait for in-flight work to finish
    ///
    /// Workflow polling stops first. Activities keep being served until every
    /// in-flight workflow body has returned, since those bodies may still
    /// schedule cleanup. Both phases share one `shutdown_timeout` deadline.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        {
            let mut status = self.status.write();
            match *status {
                WorkerStatus::Stopped | WorkerStatus::Draining => return Ok(()),
                WorkerStatus::Idle => {
                    *status = WorkerStatus::Stopped;
                    return Ok(());
                }
                WorkerStatus::Running => *status = WorkerStatus::Draining,
            }
        }

        info!("Initiating graceful shutdown");
        let deadline = Instant::now() + self.config.shutdown_timeout;

        self.stop_workflows.cancel();
        let poller = self.workflow_poller.lock().take();
        if let Some(poller) = poller {
            let _ = poller.await;
        }
        self.workflows.close();
        let workflows_drained = timeout_at(deadline, self.workflows.wait()).await.is_ok();

        self.stop_activities.cancel();
        let poller = self.activity_poller.lock().take();
        if let Some(poller) = poller {
            let _ = poller.await;
        }
        self.activities.close();
        let activities_drained = timeout_at(deadline, self.activities.wait()).await.is_ok();

        if !(workflows_drained && activities_drained) {
            let remaining = self.workflows.len() + self.activities.len();
            warn!(remaining, "Shutdown timeout reached");
            *self.status.write() = WorkerStatus::Stopped;
            return Err(WorkerError::ShutdownTimeout { remaining });
        }

        *self.status.write() = WorkerStatus::Stopped;
        info!("Worker stopped");
        Ok(())
    }

    /// Get current status
    pub fn status(&self) -> WorkerStatus {
        *self.status.read()
    }

    /// Get the worker ID
    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Number of activities currently executing
    pub fn active_activities(&self) -> usize {
        self.config.max_concurrent_activities.max(1) - self.activity_slots.available_permits()
    }

    /// Poll workflow tasks and run each on its own task
    fn start_workflow_loop(&self) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let task_list = Arc::clone(&self.task_list);
        let registry = Arc::clone(&self.registry);
        let shutdown = self.stop_workflows.clone();
        let tracker = self.workflows.clone();

        tokio::spawn(async move {
            loop {
                let task = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    task = task_list.next_workflow() => match task {
                        Some(task) => task,
                        None => break,
                    },
                };

                if !engine.claim_run(task.info.workflow_execution.run_id) {
                    debug!(
                        workflow_id = %task.info.workflow_execution.workflow_id,
                        "Skipping run that closed before a worker took it"
                    );
                    continue;
                }

                tracker.spawn(run_workflow(
                    Arc::clone(&engine),
                    Arc::clone(&registry),
                    task,
                ));
            }
            debug!("Workflow poll loop stopped");
        })
    }

    /// Poll activity tasks while activity slots are available
    fn start_activity_loop(&self) -> JoinHandle<()> {
        let task_list = Arc::clone(&self.task_list);
        let registry = Arc::clone(&self.registry);
        let slots = Arc::clone(&self.activity_slots);
        let shutdown = self.stop_activities.clone();
        let tracker = self.activities.clone();
        let worker_id = self.config.worker_id.clone();

        tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = Arc::clone(&slots).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let task = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    task = task_list.next_activity() => match task {
                        Some(task) => task,
                        None => break,
                    },
                };

                if task.is_abandoned() {
                    debug!(
                        activity_id = %task.activity_id,
                        activity_type = %task.activity_type,
                        "Skipping activity the workflow stopped waiting for"
                    );
                    continue;
                }

                let registry = Arc::clone(&registry);
                let worker_id = worker_id.clone();
                tracker.spawn(async move {
                    run_activity(registry, worker_id, task).await;
                    drop(permit);
                });
            }
            debug!("Activity poll loop stopped");
        })
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.config.worker_id)
            .field("task_list", &self.task_list.name())
            .field("status", &self.status())
            .finish()
    }
}

/// Run one workflow body to completion and record its outcome
async fn run_workflow(engine: Arc<Engine>, registry: Arc<Registry>, task: WorkflowTask) {
    let execution = task.info.workflow_execution.clone();
    let span = info_span!(
        "workflow",
        workflow_id = %execution.workflow_id,
        run_id = %execution.run_id,
        workflow_type = %task.info.workflow_type,
        trace_id = %task.trace_context.trace_id,
    );

    async move {
        let outcome = match registry.workflow(&task.info.workflow_type) {
            Err(e) => {
                warn!(error = %e, "No workflow registered for run");
                Err(WorkflowError::from(e))
            }
            Ok(workflow) => {
                debug!("Running workflow");
                let ctx = WorkflowContext::new(
                    task.info,
                    Arc::clone(&engine),
                    task.cancel,
                    task.trace_context,
                );
                match AssertUnwindSafe(workflow.run(ctx, task.input))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!(panic = %message, "Workflow panicked");
                        Err(WorkflowError::Panicked { message })
                    }
                }
            }
        };

        engine.complete_run(&execution, outcome).await;
    }
    .instrument(span)
    .await
}

/// Run one activity and report its result to the dispatcher
async fn run_activity(registry: Arc<Registry>, worker_id: String, task: ActivityTask) {
    let ActivityTask {
        info,
        activity_id,
        activity_type,
        input,
        options,
        scheduled_at,
        cancel,
        trace_context,
        started_tx,
        heartbeat_tx,
        result_tx,
    } = task;

    let span = info_span!(
        "activity",
        workflow_id = %info.workflow_execution.workflow_id,
        activity_id = %activity_id,
        activity_type = %activity_type,
        trace_id = %trace_context.trace_id,
    );

    async move {
        if started_tx.send(worker_id).is_err() {
            debug!("Activity abandoned before start");
            return;
        }

        let ctx = ActivityContext::new(ActivityInfo {
            workflow_execution: info.workflow_execution,
            activity_id,
            activity_type: activity_type.clone(),
            task_list: options.task_list.unwrap_or(info.task_list),
            attempt: 1,
            scheduled_at,
            started_at: Utc::now(),
            heartbeat_timeout: options.heartbeat_timeout,
            start_to_close_timeout: options.start_to_close_timeout,
        })
        .with_heartbeat(heartbeat_tx)
        .with_cancellation(cancel)
        .with_trace_context(trace_context)
        .with_deadline(Instant::now() + options.start_to_close_timeout);

        let result = match registry.activity(&activity_type) {
            Err(e) => {
                warn!(error = %e, "No activity registered for task");
                Err(ActivityError::from(e))
            }
            Ok(activity) => {
                debug!("Executing activity");
                match AssertUnwindSafe(activity.execute(&ctx, input))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!(panic = %message, "Activity panicked");
                        Err(ActivityError::new(format!("activity panicked: {message}"))
                            .with_type(error_types::PANIC))
                    }
                }
            }
        };

        if result_tx.send(result).is_err() {
            debug!("Workflow stopped waiting before the activity finished");
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_activities, 10);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn test_config_builder() {
        let config = WorkerConfig::default()
            .with_worker_id("w1")
            .with_max_concurrent_activities(0)
            .with_shutdown_timeout(Duration::from_secs(5));

        assert_eq!(config.worker_id, "w1");
        assert_eq!(config.max_concurrent_activities, 1);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_serialization() {
        let config = WorkerConfig::default().with_worker_id("w1");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["shutdown_timeout"], 30_000);
    }

    #[tokio::test]
    async fn test_start_twice() {
        let client = Client::in_memory();
        let worker = Worker::new(&client, "default", Registry::new(), WorkerConfig::default());

        worker.start().unwrap();
        assert_eq!(worker.status(), WorkerStatus::Running);
        assert!(matches!(worker.start(), Err(WorkerError::AlreadyRunning)));

        worker.shutdown().await.unwrap();
        assert_eq!(worker.status(), WorkerStatus::Stopped);
        assert!(matches!(worker.start(), Err(WorkerError::AlreadyStopped)));
    }

    #[tokio::test]
    async fn test_shutdown_idle_worker() {
        let client = Client::in_memory();
        let worker = Worker::new(&client, "default", Registry::new(), WorkerConfig::default());

        worker.shutdown().await.unwrap();
        assert_eq!(worker.status(), WorkerStatus::Stopped);
        assert_eq!(worker.active_activities(), 0);
    }
}
