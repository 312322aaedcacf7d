//! Run bookkeeping and activity dispatch
//!
//! The `Engine` is responsible for:
//! - Creating runs and handing them to workers through task lists
//! - Dispatching activities and enforcing their timeouts
//! - Forwarding cancellation from a run to its activities
//! - Recording every step in the run's history

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::client::{EngineError, StartWorkflowOptions};
use super::task_list::{ActivityTask, TaskList, WorkflowTask};
use crate::activity::{error_types, ActivityError};
use crate::persistence::{NewRun, RunRecord, RunStore, StoreError};
use crate::workflow::{
    TimeoutType, WorkflowContext, WorkflowError, WorkflowEvent, WorkflowExecution, WorkflowInfo,
};

/// Buffered heartbeats per activity before the activity's `heartbeat` call waits
const HEARTBEAT_BUFFER: usize = 16;

/// Final outcome of a run, published once
pub(crate) type RunOutcome = Result<serde_json::Value, WorkflowError>;

/// Live state of an open run
struct RunHandle {
    execution: WorkflowExecution,
    cancel: CancellationToken,
    outcome: watch::Sender<Option<RunOutcome>>,
    /// Set once a worker took the workflow task, or shutdown abandoned it
    claimed: bool,
}

/// In-process workflow engine
///
/// Run state is written to a [`RunStore`]; the cancellation tokens and
/// result channels of open runs live here.
pub(crate) struct Engine {
    store: Arc<dyn RunStore>,
    task_lists: DashMap<String, Arc<TaskList>>,
    runs: DashMap<Uuid, RunHandle>,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            store,
            task_lists: DashMap::new(),
            runs: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Get or create a task list
    pub fn task_list(&self, name: &str) -> Arc<TaskList> {
        if let Some(list) = self.task_lists.get(name) {
            return list.value().clone();
        }
        self.task_lists
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TaskList::new(name)))
            .value()
            .clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting new runs and release pending activity waits
    ///
    /// Runs that no worker has picked up yet fail with
    /// `WorkflowError::EngineShutdown`. Runs already on a worker see the same
    /// error from their pending activities; activities scheduled through a
    /// detached context are still dispatched so cleanup can finish.
    pub async fn shutdown(&self) {
        info!(open_runs = self.runs.len(), "engine shutting down");
        self.shutdown.cancel();

        let unclaimed: Vec<WorkflowExecution> = self
            .runs
            .iter_mut()
            .filter_map(|mut handle| {
                if handle.claimed {
                    return None;
                }
                handle.claimed = true;
                Some(handle.execution.clone())
            })
            .collect();

        for execution in unclaimed {
            debug!(
                workflow_id = %execution.workflow_id,
                run_id = %execution.run_id,
                "failing run that never reached a worker"
            );
            self.complete_run(&execution, Err(WorkflowError::EngineShutdown))
                .await;
        }
    }

    /// Hand an open run to a worker
    ///
    /// Returns false when the run is no longer open or another caller
    /// already claimed it.
    pub fn claim_run(&self, run_id: Uuid) -> bool {
        match self.runs.get_mut(&run_id) {
            Some(mut handle) if !handle.claimed => {
                handle.claimed = true;
                true
            }
            _ => false,
        }
    }

    // =========================================================================
    // Run lifecycle
    // =========================================================================

    /// Create a run and queue it on its task list
    #[instrument(skip(self, options, input), fields(workflow_type = %workflow_type))]
    pub async fn start_run(
        &self,
        options: StartWorkflowOptions,
        workflow_type: &str,
        input: serde_json::Value,
    ) -> Result<WorkflowExecution, EngineError> {
        if self.is_shutdown() {
            return Err(EngineError::Shutdown);
        }

        let workflow_id = options
            .workflow_id
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let execution = WorkflowExecution::new(workflow_id, Uuid::now_v7());
        let trace_context = options.trace_context.unwrap_or_default();

        let record = self
            .store
            .create_run(NewRun {
                execution: execution.clone(),
                workflow_type: workflow_type.to_string(),
                task_list: options.task_list.clone(),
                input: input.clone(),
                trace_context: trace_context.clone(),
            })
            .await
            .map_err(|e| match e {
                StoreError::AlreadyRunning {
                    workflow_id,
                    run_id,
                } => EngineError::WorkflowAlreadyRunning {
                    workflow_id,
                    run_id,
                },
                other => EngineError::Store(other),
            })?;

        let cancel = CancellationToken::new();
        let (outcome, _) = watch::channel(None);
        self.runs.insert(
            execution.run_id,
            RunHandle {
                execution: execution.clone(),
                cancel: cancel.clone(),
                outcome,
                claimed: false,
            },
        );

        let queued = self.task_list(&options.task_list).push_workflow(WorkflowTask {
            info: WorkflowInfo {
                workflow_execution: execution.clone(),
                workflow_type: workflow_type.to_string(),
                task_list: options.task_list.clone(),
                started_at: record.started_at,
            },
            input,
            cancel,
            trace_context,
        });
        if !queued {
            self.runs.remove(&execution.run_id);
            return Err(EngineError::Shutdown);
        }

        info!(
            workflow_id = %execution.workflow_id,
            run_id = %execution.run_id,
            task_list = %options.task_list,
            "workflow started"
        );
        Ok(execution)
    }

    /// Record a cancellation request and cancel the run's token
    ///
    /// Repeated requests for a run that is still open are accepted; only the
    /// first one is recorded.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, workflow_id: &str, reason: &str) -> Result<RunRecord, EngineError> {
        let record = self.store.get_run(workflow_id).await.map_err(not_found)?;
        let run_id = record.execution.run_id;

        if record.status.is_terminal() {
            return Err(EngineError::WorkflowClosed {
                workflow_id: workflow_id.to_string(),
                status: record.status,
            });
        }

        if record.cancel_requested.is_none() {
            let appended = self
                .store
                .append_event(
                    run_id,
                    WorkflowEvent::WorkflowCancelRequested {
                        reason: reason.to_string(),
                    },
                )
                .await;
            match appended {
                Ok(_) => {}
                // The run closed between the lookup and the append
                Err(StoreError::RunClosed(_)) => {
                    let closed = self.store.get_run_by_id(run_id).await?;
                    return Err(EngineError::WorkflowClosed {
                        workflow_id: workflow_id.to_string(),
                        status: closed.status,
                    });
                }
                Err(other) => return Err(other.into()),
            }
            info!(%workflow_id, %run_id, %reason, "workflow cancellation requested");
        } else {
            debug!(%workflow_id, %run_id, "workflow already cancelling");
        }

        if let Some(handle) = self.runs.get(&run_id) {
            handle.cancel.cancel();
        }

        Ok(self.store.get_run_by_id(run_id).await?)
    }

    /// Record the run's terminal event and publish its outcome
    pub async fn complete_run(&self, execution: &WorkflowExecution, outcome: RunOutcome) {
        let event = match &outcome {
            Ok(result) => WorkflowEvent::WorkflowCompleted {
                result: result.clone(),
            },
            Err(error) => WorkflowEvent::WorkflowFailed {
                error: error.clone(),
            },
        };

        match self.store.append_event(execution.run_id, event).await {
            Ok(_) => match &outcome {
                Ok(_) => info!(
                    workflow_id = %execution.workflow_id,
                    run_id = %execution.run_id,
                    "workflow completed"
                ),
                Err(error) => warn!(
                    workflow_id = %execution.workflow_id,
                    run_id = %execution.run_id,
                    error = %error,
                    "workflow failed"
                ),
            },
            Err(e) => warn!(
                workflow_id = %execution.workflow_id,
                run_id = %execution.run_id,
                error = %e,
                "failed to record workflow outcome"
            ),
        }

        if let Some((_, handle)) = self.runs.remove(&execution.run_id) {
            handle.outcome.send_replace(Some(outcome));
        }
    }

    /// Subscribe to the outcome of an open run
    pub fn subscribe(&self, run_id: Uuid) -> Option<watch::Receiver<Option<RunOutcome>>> {
        self.runs.get(&run_id).map(|handle| handle.outcome.subscribe())
    }

    // =========================================================================
    // Activity dispatch
    // =========================================================================

    /// Dispatch an activity and wait for it to close
    ///
    /// The activity gets a child of the context's cancellation token. Until a
    /// worker picks the task up, only the schedule-to-start timeout applies,
    /// and a cancelled context abandons the task when the caller does not
    /// wait for cancellation. Once started, heartbeats reset the heartbeat
    /// deadline, and cancellation of the context is forwarded to the activity.
    /// Engine shutdown releases the wait unless the context is detached.
    #[instrument(
        skip(self, ctx, input),
        fields(
            workflow_id = %ctx.info().workflow_execution.workflow_id,
            activity_id = %activity_id,
            activity_type = %activity_type,
        )
    )]
    pub async fn execute_activity(
        &self,
        ctx: &WorkflowContext,
        activity_id: String,
        activity_type: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, WorkflowError> {
        let options = ctx.activity_options().clone();
        let info = ctx.info().clone();
        let run_id = info.workflow_execution.run_id;
        let task_list = options
            .task_list
            .clone()
            .unwrap_or_else(|| info.task_list.clone());

        self.store
            .append_event(
                run_id,
                WorkflowEvent::ActivityScheduled {
                    activity_id: activity_id.clone(),
                    activity_type: activity_type.to_string(),
                    input: input.clone(),
                    options: options.clone(),
                },
            )
            .await
            .map_err(|e| WorkflowError::Store {
                message: e.to_string(),
            })?;

        let cancel = ctx.cancellation_token().child_token();
        // Abandoning this future cancels the activity
        let _cancel_on_drop = cancel.clone().drop_guard();

        let (started_tx, mut started_rx) = oneshot::channel();
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel(HEARTBEAT_BUFFER);
        let (result_tx, mut result_rx) = oneshot::channel();

        let release_on_shutdown = !ctx.is_detached();
        let queued = self.task_list(&task_list).push_activity(ActivityTask {
            info,
            activity_id: activity_id.clone(),
            activity_type: activity_type.to_string(),
            input,
            options: options.clone(),
            scheduled_at: Utc::now(),
            cancel: cancel.clone(),
            trace_context: ctx.trace_context().clone(),
            started_tx,
            heartbeat_tx,
            result_tx,
        });
        if !queued {
            self.record(run_id, WorkflowEvent::ActivityCanceled {
                activity_id: activity_id.clone(),
            })
            .await;
            return Err(WorkflowError::EngineShutdown);
        }
        debug!(%task_list, "activity scheduled");

        let failed = |error: ActivityError| WorkflowError::ActivityFailed {
            activity_id: activity_id.clone(),
            activity_type: activity_type.to_string(),
            error,
        };
        let timed_out = |timeout_type: TimeoutType| WorkflowError::ActivityTimedOut {
            activity_id: activity_id.clone(),
            activity_type: activity_type.to_string(),
            timeout_type,
        };

        // Phase 1: wait for a worker to pick the task up
        let schedule_deadline = Instant::now() + options.schedule_to_start_timeout;
        let worker_id = tokio::select! {
            started = &mut started_rx => match started {
                Ok(worker_id) => worker_id,
                Err(_) => {
                    let error = ActivityError::new("worker dropped the activity before starting it")
                        .with_type(error_types::WORKER_LOST);
                    self.record(run_id, WorkflowEvent::ActivityFailed {
                        activity_id: activity_id.clone(),
                        error: error.clone(),
                    })
                    .await;
                    return Err(failed(error));
                }
            },
            _ = sleep_until(schedule_deadline) => {
                warn!(timeout = ?options.schedule_to_start_timeout, "activity was not picked up in time");
                cancel.cancel();
                self.record(run_id, WorkflowEvent::ActivityTimedOut {
                    activity_id: activity_id.clone(),
                    timeout_type: TimeoutType::ScheduleToStart,
                })
                .await;
                return Err(timed_out(TimeoutType::ScheduleToStart));
            }
            _ = ctx.cancelled(), if !options.wait_for_cancellation => {
                debug!("context cancelled before the activity started");
                self.record(run_id, WorkflowEvent::ActivityCanceled {
                    activity_id: activity_id.clone(),
                })
                .await;
                return Err(WorkflowError::Canceled);
            }
            _ = self.shutdown.cancelled(), if release_on_shutdown => {
                debug!("engine shut down before the activity started");
                cancel.cancel();
                self.record(run_id, WorkflowEvent::ActivityCanceled {
                    activity_id: activity_id.clone(),
                })
                .await;
                return Err(WorkflowError::EngineShutdown);
            }
        };

        self.record(
            run_id,
            WorkflowEvent::ActivityStarted {
                activity_id: activity_id.clone(),
                attempt: 1,
                worker_id: worker_id.clone(),
            },
        )
        .await;
        debug!(%worker_id, "activity started");

        // Phase 2: wait for the result, enforcing liveness
        let close_deadline = Instant::now() + options.start_to_close_timeout;
        let mut heartbeat_deadline = options.heartbeat_timeout.map(|t| Instant::now() + t);
        let mut cancel_forwarded = false;

        loop {
            let next_deadline = heartbeat_deadline
                .map_or(close_deadline, |hb| hb.min(close_deadline));

            tokio::select! {
                result = &mut result_rx => {
                    return match result {
                        Ok(Ok(value)) => {
                            self.record(run_id, WorkflowEvent::ActivityCompleted {
                                activity_id: activity_id.clone(),
                                result: value.clone(),
                            })
                            .await;
                            debug!("activity completed");
                            Ok(value)
                        }
                        Ok(Err(error)) => {
                            warn!(error = %error, "activity failed");
                            self.record(run_id, WorkflowEvent::ActivityFailed {
                                activity_id: activity_id.clone(),
                                error: error.clone(),
                            })
                            .await;
                            Err(failed(error))
                        }
                        Err(_) => {
                            let error = ActivityError::new("worker dropped the activity without a result")
                                .with_type(error_types::WORKER_LOST);
                            warn!("activity lost");
                            self.record(run_id, WorkflowEvent::ActivityFailed {
                                activity_id: activity_id.clone(),
                                error: error.clone(),
                            })
                            .await;
                            Err(failed(error))
                        }
                    };
                }
                Some(heartbeat) = heartbeat_rx.recv() => {
                    if let Some(timeout) = options.heartbeat_timeout {
                        heartbeat_deadline = Some(Instant::now() + timeout);
                    }
                    if let Err(e) = self.store.record_heartbeat(run_id, &activity_id, &heartbeat).await {
                        warn!(error = %e, "failed to record heartbeat");
                    }
                }
                _ = sleep_until(next_deadline) => {
                    let timeout_type = match heartbeat_deadline {
                        Some(hb) if hb < close_deadline => TimeoutType::Heartbeat,
                        _ => TimeoutType::StartToClose,
                    };
                    warn!(%timeout_type, "activity timed out");
                    cancel.cancel();
                    self.record(run_id, WorkflowEvent::ActivityTimedOut {
                        activity_id: activity_id.clone(),
                        timeout_type,
                    })
                    .await;
                    return Err(timed_out(timeout_type));
                }
                _ = ctx.cancelled(), if !cancel_forwarded => {
                    cancel_forwarded = true;
                    self.record(run_id, WorkflowEvent::ActivityCancelRequested {
                        activity_id: activity_id.clone(),
                    })
                    .await;

                    if !options.wait_for_cancellation {
                        debug!("not waiting for the cancelled activity");
                        self.record(run_id, WorkflowEvent::ActivityCanceled {
                            activity_id: activity_id.clone(),
                        })
                        .await;
                        return Err(WorkflowError::Canceled);
                    }
                    debug!("cancellation forwarded, waiting for the activity");
                }
                _ = self.shutdown.cancelled(), if release_on_shutdown => {
                    debug!("engine shut down, abandoning the activity");
                    cancel.cancel();
                    self.record(run_id, WorkflowEvent::ActivityCanceled {
                        activity_id: activity_id.clone(),
                    })
                    .await;
                    return Err(WorkflowError::EngineShutdown);
                }
            }
        }
    }

    /// Append an event mid-dispatch; failures are logged
    async fn record(&self, run_id: Uuid, event: WorkflowEvent) {
        let name = event.name();
        if let Err(e) = self.store.append_event(run_id, event).await {
            warn!(%run_id, event = name, error = %e, "failed to record event");
        }
    }
}

/// Map a lookup failure to `WorkflowNotFound`
pub(super) fn not_found(e: StoreError) -> EngineError {
    match e {
        StoreError::WorkflowNotFound(id) => EngineError::WorkflowNotFound(id),
        other => EngineError::Store(other),
    }
}
