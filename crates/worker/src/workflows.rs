// Cancellable-activity workflow
//
// Runs the long-running activity, then the skippable step, with the cleanup
// activity deferred via `with_cleanup` so it runs on a detached context
// however the body ends. Cancelling the run cancels the long-running
// activity; because the activity options wait for cancellation, the
// workflow receives the activity's own sentinel outcome and carries on.

use std::time::Duration;

use async_trait::async_trait;
use cancelflow_durable::prelude::*;
use cancelflow_durable::workflow::WorkflowExecution;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::activities::{
    CleanupActivity, LongRunningActivity, LongRunningInput, LongRunningOutcome, SkipReport,
    SkippableActivity,
};

/// Input for [`CancelActivityWorkflow`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelWorkflowInput {
    /// Passed through to the long-running activity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ticks: Option<u64>,
}

/// Result of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelWorkflowOutput {
    /// How the long-running activity ended
    pub unit_of_work: LongRunningOutcome,

    /// Report from the skippable step (`None` if it failed)
    pub skipped_step: Option<SkipReport>,

    /// Whether the workflow saw the run's cancellation
    pub cancellation_observed: bool,
}

// ============================================================================
// Step tracking
// ============================================================================

/// Step of a run, in the order the workflow moves through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Started,
    RunningUnitOfWork,
    Cancelled,
    Completed,
    Failed,
    RunningSkippableStep,
    RunningCleanup,
    Finished,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Started => "started",
            Self::RunningUnitOfWork => "running_unit_of_work",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RunningSkippableStep => "running_skippable_step",
            Self::RunningCleanup => "running_cleanup",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct ProgressState {
    phase: Phase,
    step: u32,
    cancellation_observed: bool,
    transitions: Vec<Phase>,
}

/// Step index and cancellation flag of one run
///
/// Shared by the workflow body and its cleanup closure.
#[derive(Debug)]
pub struct RunProgress {
    execution: WorkflowExecution,
    state: Mutex<ProgressState>,
}

impl RunProgress {
    pub fn new(execution: WorkflowExecution) -> Self {
        Self {
            execution,
            state: Mutex::new(ProgressState {
                phase: Phase::Started,
                step: 0,
                cancellation_observed: false,
                transitions: vec![Phase::Started],
            }),
        }
    }

    /// Move to `phase` and log the transition
    pub fn enter(&self, phase: Phase) {
        let mut state = self.state.lock();
        let from = state.phase;
        state.phase = phase;
        state.step += 1;
        state.transitions.push(phase);
        tracing::info!(
            workflow_id = %self.execution.workflow_id,
            run_id = %self.execution.run_id,
            step = state.step,
            from = %from,
            to = %phase,
            "Workflow step transition"
        );
    }

    pub fn observe_cancellation(&self) {
        self.state.lock().cancellation_observed = true;
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn step(&self) -> u32 {
        self.state.lock().step
    }

    pub fn cancellation_observed(&self) -> bool {
        self.state.lock().cancellation_observed
    }

    /// Every phase entered so far, starting with `Started`
    pub fn transitions(&self) -> Vec<Phase> {
        self.state.lock().transitions.clone()
    }
}

// ============================================================================
// Workflow
// ============================================================================

/// Heartbeat timeout of every activity the workflow schedules
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Activity options used by [`CancelActivityWorkflow`] unless overridden
pub fn default_activity_options() -> ActivityOptions {
    ActivityOptions::default()
        .with_schedule_to_start_timeout(Duration::from_secs(60))
        .with_start_to_close_timeout(Duration::from_secs(30 * 60))
        .with_heartbeat(HEARTBEAT_TIMEOUT)
        .with_wait_for_cancellation(true)
}

/// Long-running activity, then the skippable step, with deferred cleanup
#[derive(Debug, Clone)]
pub struct CancelActivityWorkflow {
    activity_options: ActivityOptions,
}

impl CancelActivityWorkflow {
    pub fn new() -> Self {
        Self {
            activity_options: default_activity_options(),
        }
    }

    /// Replace the options every activity of the workflow is scheduled with
    pub fn with_activity_options(mut self, options: ActivityOptions) -> Self {
        self.activity_options = options;
        self
    }

    pub fn activity_options(&self) -> &ActivityOptions {
        &self.activity_options
    }
}

impl Default for CancelActivityWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Workflow for CancelActivityWorkflow {
    const TYPE: &'static str = "cancel_activity";
    type Input = CancelWorkflowInput;
    type Output = CancelWorkflowOutput;

    async fn run(
        &self,
        ctx: WorkflowContext,
        input: CancelWorkflowInput,
    ) -> Result<CancelWorkflowOutput, WorkflowError> {
        let ctx = ctx.with_activity_options(self.activity_options.clone());
        let progress = RunProgress::new(ctx.info().workflow_execution.clone());
        tracing::info!(
            workflow_id = %ctx.info().workflow_execution.workflow_id,
            run_id = %ctx.info().workflow_execution.run_id,
            trace_id = %ctx.trace_context().trace_id,
            "Cancel workflow started"
        );

        let cleanup_progress = &progress;
        let result = with_cleanup(
            &ctx,
            run_steps(&ctx, &progress, input),
            |cleanup_ctx| async move {
                cleanup_progress.enter(Phase::RunningCleanup);
                cleanup_ctx.execute_activity::<CleanupActivity>(()).await
            },
        )
        .await;
        progress.enter(Phase::Finished);

        let (unit_of_work, skipped_step) = result?;
        tracing::info!(
            workflow_id = %ctx.info().workflow_execution.workflow_id,
            cancelled = unit_of_work.is_cancelled(),
            "Workflow completed"
        );

        Ok(CancelWorkflowOutput {
            unit_of_work,
            skipped_step,
            cancellation_observed: progress.cancellation_observed(),
        })
    }
}

async fn run_steps(
    ctx: &WorkflowContext,
    progress: &RunProgress,
    input: CancelWorkflowInput,
) -> Result<(LongRunningOutcome, Option<SkipReport>), WorkflowError> {
    progress.enter(Phase::RunningUnitOfWork);
    let unit_of_work = match ctx
        .execute_activity::<LongRunningActivity>(LongRunningInput {
            max_ticks: input.max_ticks,
        })
        .await
    {
        Ok(outcome) => outcome,
        // Only reachable when the options do not wait for cancellation
        Err(WorkflowError::Canceled) => LongRunningOutcome::Cancelled { ticks: 0 },
        Err(e) => {
            tracing::error!(
                workflow_id = %ctx.info().workflow_execution.workflow_id,
                error = %e,
                "Long-running activity failed"
            );
            progress.enter(Phase::Failed);
            return Err(e);
        }
    };
    tracing::info!(
        workflow_id = %ctx.info().workflow_execution.workflow_id,
        outcome = ?unit_of_work,
        "Long-running activity returned"
    );

    if unit_of_work.is_cancelled() || ctx.is_cancelled() {
        progress.observe_cancellation();
        progress.enter(Phase::Cancelled);
    } else {
        progress.enter(Phase::Completed);
    }

    progress.enter(Phase::RunningSkippableStep);
    let skipped_step = match ctx.execute_activity::<SkippableActivity>(()).await {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::warn!(
                workflow_id = %ctx.info().workflow_execution.workflow_id,
                error = %e,
                "Skippable activity failed"
            );
            None
        }
    };

    Ok((unit_of_work, skipped_step))
}
