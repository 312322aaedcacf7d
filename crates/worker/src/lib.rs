//! Worker service for the cancellable-activity workflow
//!
//! Hosts an in-process engine, a worker serving the `cancelGroup` task list,
//! and the HTTP admin API used by the `cancelflow` CLI.

pub mod activities;
pub mod api;
pub mod config;
pub mod workflows;

use std::time::Duration;

use axum::Router;
use cancelflow_durable::{Client, Registry, Worker, WorkerError};
use tower_http::trace::TraceLayer;

pub use activities::{
    CleanupActivity, LongRunningActivity, LongRunningInput, LongRunningOutcome, SkipReport,
    SkippableActivity,
};
pub use config::WorkerServiceConfig;
pub use workflows::{CancelActivityWorkflow, CancelWorkflowInput, CancelWorkflowOutput};

/// Registry with the cancel workflow and its activities
///
/// `heartbeat_interval` is capped at [`config::MAX_HEARTBEAT_INTERVAL`].
pub fn registry(heartbeat_interval: Duration) -> Registry {
    let heartbeat_interval = heartbeat_interval.min(config::MAX_HEARTBEAT_INTERVAL);
    let mut registry = Registry::new();
    registry
        .register_workflow(CancelActivityWorkflow::new())
        .register_activity(LongRunningActivity::new(heartbeat_interval))
        .register_activity(SkippableActivity)
        .register_activity(CleanupActivity);
    registry
}

/// Engine client plus a running worker
pub struct WorkerService {
    client: Client,
    worker: Worker,
    config: WorkerServiceConfig,
}

impl WorkerService {
    /// Create an in-memory engine and start a worker on the configured task list
    pub fn start(config: WorkerServiceConfig) -> Result<Self, WorkerError> {
        Self::start_with_registry(config.clone(), registry(config.heartbeat_interval))
    }

    /// Same as [`WorkerService::start`] with a caller-built registry
    pub fn start_with_registry(
        config: WorkerServiceConfig,
        registry: Registry,
    ) -> Result<Self, WorkerError> {
        let client = Client::in_memory();
        let worker = Worker::new(
            &client,
            config.task_list.clone(),
            registry,
            config.worker_config(),
        );
        worker.start()?;

        tracing::info!(
            task_list = %config.task_list,
            worker_id = %worker.worker_id(),
            max_concurrent = config.max_concurrent_activities,
            heartbeat_interval_ms = config.heartbeat_interval.as_millis() as u64,
            "Worker started"
        );

        Ok(Self {
            client,
            worker,
            config,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn config(&self) -> &WorkerServiceConfig {
        &self.config
    }

    /// Admin API routes bound to this service's engine
    pub fn router(&self) -> Router {
        api::routes(api::AppState::new(
            self.client.clone(),
            self.config.task_list.clone(),
        ))
        .layer(TraceLayer::new_for_http())
    }

    /// Stop the engine, then drain the worker
    ///
    /// Runs still waiting on activities fail with an engine-shutdown error
    /// once their cleanup step has run. The worker keeps serving activities
    /// until those runs have returned.
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        self.client.shutdown().await;
        self.worker.shutdown().await
    }
}
