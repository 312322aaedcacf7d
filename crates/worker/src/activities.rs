// Activities served on the cancel task list
//
// The long-running activity is the cancellable unit of work: it heartbeats on
// a fixed interval and returns a sentinel outcome once its context is
// cancelled. The skippable and cleanup activities are trivial steps whose
// interest is *when* they run relative to cancellation.

use std::time::Duration;

use async_trait::async_trait;
use cancelflow_durable::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Heartbeat interval used when none is configured
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Long-running activity
// ============================================================================

/// Input for [`LongRunningActivity`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LongRunningInput {
    /// Finish normally after this many heartbeats (runs until cancelled if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ticks: Option<u64>,
}

/// How the long-running activity ended
///
/// Cancellation is reported here rather than as an error, so the workflow
/// can carry on with its remaining steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LongRunningOutcome {
    /// Reached `max_ticks`
    Completed { ticks: u64 },
    /// Observed cancellation
    Cancelled { ticks: u64 },
}

impl LongRunningOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Heartbeats sent before the activity returned
    pub fn ticks(&self) -> u64 {
        match self {
            Self::Completed { ticks } | Self::Cancelled { ticks } => *ticks,
        }
    }
}

/// Heartbeats until cancelled or until `max_ticks` is reached
#[derive(Debug, Clone)]
pub struct LongRunningActivity {
    heartbeat_interval: Duration,
}

impl LongRunningActivity {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            heartbeat_interval: heartbeat_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }
}

impl Default for LongRunningActivity {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

#[async_trait]
impl Activity for LongRunningActivity {
    const TYPE: &'static str = "long_running";
    type Input = LongRunningInput;
    type Output = LongRunningOutcome;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: LongRunningInput,
    ) -> Result<LongRunningOutcome, ActivityError> {
        let info = ctx.info();
        tracing::info!(
            workflow_id = %info.workflow_execution.workflow_id,
            activity_id = %info.activity_id,
            interval_ms = self.heartbeat_interval.as_millis() as u64,
            max_ticks = ?input.max_ticks,
            "Long-running activity started, cancel it with `cancelflow cancel {}`",
            info.workflow_execution.workflow_id
        );

        let period = self.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            if input.max_ticks.is_some_and(|max| ticks >= max) {
                tracing::info!(ticks, "Long-running activity finished its work");
                return Ok(LongRunningOutcome::Completed { ticks });
            }

            tokio::select! {
                biased;

                _ = ctx.cancelled() => {
                    tracing::info!(ticks, "Context is cancelled");
                    return Ok(LongRunningOutcome::Cancelled { ticks });
                }
                _ = ticker.tick() => {
                    ticks += 1;
                    tracing::debug!(ticks, "Heartbeating");
                    // A cancelled heartbeat is picked up by the next select
                    if let Err(e) = ctx.heartbeat(Some(json!({ "ticks": ticks }))).await {
                        tracing::debug!(error = %e, "Heartbeat not delivered");
                    }
                }
            }
        }
    }
}

// ============================================================================
// Skippable activity
// ============================================================================

/// What the skippable activity saw when it ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipReport {
    /// The run had already been cancelled when the step executed
    pub ran_after_cancellation: bool,
}

/// Step scheduled after the long-running activity, cancelled or not
#[derive(Debug, Clone, Default)]
pub struct SkippableActivity;

#[async_trait]
impl Activity for SkippableActivity {
    const TYPE: &'static str = "skippable";
    type Input = ();
    type Output = SkipReport;

    async fn execute(&self, ctx: &ActivityContext, _input: ()) -> Result<SkipReport, ActivityError> {
        let ran_after_cancellation = ctx.is_cancelled();
        if ran_after_cancellation {
            tracing::info!(
                workflow_id = %ctx.info().workflow_execution.workflow_id,
                "Skippable activity running after cancellation"
            );
        } else {
            tracing::info!(
                workflow_id = %ctx.info().workflow_execution.workflow_id,
                "Skippable activity running"
            );
        }

        Ok(SkipReport {
            ran_after_cancellation,
        })
    }
}

// ============================================================================
// Cleanup activity
// ============================================================================

/// Idempotent cleanup step; only writes a log entry
#[derive(Debug, Clone, Default)]
pub struct CleanupActivity;

#[async_trait]
impl Activity for CleanupActivity {
    const TYPE: &'static str = "cleanup";
    type Input = ();
    type Output = ();

    async fn execute(&self, ctx: &ActivityContext, _input: ()) -> Result<(), ActivityError> {
        tracing::info!(
            workflow_id = %ctx.info().workflow_execution.workflow_id,
            run_id = %ctx.info().workflow_execution.run_id,
            trace_id = %ctx.trace_context().trace_id,
            "Cleanup activity started"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cancelflow_durable::activity::ActivityInfo;
    use cancelflow_durable::workflow::WorkflowExecution;
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn activity_info(activity_type: &str) -> ActivityInfo {
        ActivityInfo {
            workflow_execution: WorkflowExecution::new("wf-test", uuid::Uuid::now_v7()),
            activity_id: "0".to_string(),
            activity_type: activity_type.to_string(),
            task_list: "test".to_string(),
            attempt: 1,
            scheduled_at: Utc::now(),
            started_at: Utc::now(),
            heartbeat_timeout: Some(Duration::from_secs(10)),
            start_to_close_timeout: Duration::from_secs(1800),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_running_completes_after_max_ticks() {
        let (tx, mut rx) = mpsc::channel(16);
        let ctx = ActivityContext::new(activity_info(LongRunningActivity::TYPE)).with_heartbeat(tx);

        let outcome = LongRunningActivity::default()
            .execute(&ctx, LongRunningInput { max_ticks: Some(3) })
            .await
            .unwrap();

        assert_eq!(outcome, LongRunningOutcome::Completed { ticks: 3 });
        assert!(!outcome.is_cancelled());

        let mut details = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            details.push(payload.details);
        }
        assert_eq!(
            details,
            vec![
                Some(json!({"ticks": 1})),
                Some(json!({"ticks": 2})),
                Some(json!({"ticks": 3})),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_running_heartbeats_every_interval() {
        let interval = Duration::from_millis(500);
        let (tx, mut rx) = mpsc::channel(16);
        let collector = tokio::spawn(async move {
            let mut received = Vec::new();
            while rx.recv().await.is_some() {
                received.push(Instant::now());
            }
            received
        });

        let ctx = ActivityContext::new(activity_info(LongRunningActivity::TYPE)).with_heartbeat(tx);
        let started = Instant::now();
        LongRunningActivity::new(interval)
            .execute(&ctx, LongRunningInput { max_ticks: Some(5) })
            .await
            .unwrap();
        drop(ctx);

        let received = collector.await.unwrap();
        assert_eq!(received.len(), 5);
        let mut previous = started;
        for at in received {
            assert!(at - previous <= interval, "gap of {:?}", at - previous);
            previous = at;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_running_returns_sentinel_after_cancel() {
        let ctx = ActivityContext::new(activity_info(LongRunningActivity::TYPE));
        let handle = ctx.cancellation_handle();
        let cancel_at = Duration::from_millis(3500);
        tokio::spawn(async move {
            tokio::time::sleep(cancel_at).await;
            handle.cancel();
        });

        let started = Instant::now();
        let outcome = LongRunningActivity::default()
            .execute(&ctx, LongRunningInput::default())
            .await
            .unwrap();

        assert_eq!(outcome, LongRunningOutcome::Cancelled { ticks: 3 });
        assert!(started.elapsed() - cancel_at < DEFAULT_HEARTBEAT_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_running_already_cancelled() {
        let ctx = ActivityContext::new(activity_info(LongRunningActivity::TYPE));
        ctx.cancellation_handle().cancel();

        let outcome = LongRunningActivity::default()
            .execute(&ctx, LongRunningInput::default())
            .await
            .unwrap();

        assert_eq!(outcome, LongRunningOutcome::Cancelled { ticks: 0 });
        assert_eq!(outcome.ticks(), 0);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(LongRunningOutcome::Cancelled { ticks: 4 }).unwrap();
        assert_eq!(json, json!({"outcome": "cancelled", "ticks": 4}));
    }

    #[tokio::test]
    async fn test_skippable_reports_cancellation() {
        let ctx = ActivityContext::new(activity_info(SkippableActivity::TYPE));
        let report = SkippableActivity.execute(&ctx, ()).await.unwrap();
        assert!(!report.ran_after_cancellation);

        ctx.cancellation_handle().cancel();
        let report = SkippableActivity.execute(&ctx, ()).await.unwrap();
        assert!(report.ran_after_cancellation);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let ctx = ActivityContext::new(activity_info(CleanupActivity::TYPE));
        assert!(CleanupActivity.execute(&ctx, ()).await.is_ok());
        assert!(CleanupActivity.execute(&ctx, ()).await.is_ok());
    }
}
