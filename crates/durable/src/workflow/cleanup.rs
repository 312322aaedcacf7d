//! Cleanup that runs however the workflow body ends

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, warn};

use super::{WorkflowContext, WorkflowError};

/// Run `body`, then run `cleanup` on a detached context
///
/// The cleanup runs exactly once when the body returns `Ok`, returns `Err`
/// or panics. It receives `ctx.detach()`, so activities it schedules run
/// normally even if the run was cancelled. A cleanup error is logged and
/// swallowed; the body's result is returned as-is, and a body panic is
/// resumed after cleanup.
///
/// # Example
///
/// ```ignore
/// with_cleanup(
///     &ctx,
///     async { ctx.execute_activity::<Upload>(input).await },
///     |cleanup_ctx| async move {
///         cleanup_ctx.execute_activity::<RemoveTempFiles>(()).await?;
///         Ok(())
///     },
/// )
/// .await
/// ```
pub async fn with_cleanup<T, B, C, F>(
    ctx: &WorkflowContext,
    body: B,
    cleanup: C,
) -> Result<T, WorkflowError>
where
    B: Future<Output = Result<T, WorkflowError>>,
    C: FnOnce(WorkflowContext) -> F,
    F: Future<Output = Result<(), WorkflowError>>,
{
    let outcome = AssertUnwindSafe(body).catch_unwind().await;

    let detached = ctx.detach();
    debug!(
        workflow_id = %ctx.info().workflow_execution.workflow_id,
        cancelled = ctx.is_cancelled(),
        body_ok = matches!(outcome, Ok(Ok(_))),
        "running cleanup"
    );

    match AssertUnwindSafe(cleanup(detached)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(
                workflow_id = %ctx.info().workflow_execution.workflow_id,
                error = %e,
                "cleanup failed"
            );
        }
        Err(panic) => {
            warn!(
                workflow_id = %ctx.info().workflow_execution.workflow_id,
                panic = %panic_message(panic.as_ref()),
                "cleanup panicked"
            );
        }
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
