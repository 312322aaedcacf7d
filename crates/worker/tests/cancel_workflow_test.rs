//! End-to-end runs of the cancel workflow on a paused clock

use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use cancelflow_durable::prelude::*;
use cancelflow_durable::workflow::HistoryEvent;
use cancelflow_worker::activities::{CleanupActivity, LongRunningActivity, SkippableActivity};
use cancelflow_worker::{
    CancelActivityWorkflow, CancelWorkflowInput, CancelWorkflowOutput, LongRunningOutcome,
    SkipReport, WorkerService, WorkerServiceConfig,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::time::Instant;
use tower::ServiceExt;

fn service() -> WorkerService {
    let config = WorkerServiceConfig {
        worker_id: "test-worker".to_string(),
        ..Default::default()
    };
    WorkerService::start(config).expect("worker should start")
}

async fn start(client: &Client, workflow_id: &str, input: CancelWorkflowInput) {
    client
        .start::<CancelActivityWorkflow>(
            StartWorkflowOptions::new("cancelGroup").with_workflow_id(workflow_id),
            input,
        )
        .await
        .expect("workflow should start");
}

/// Activity IDs scheduled with the given type
fn scheduled(history: &[HistoryEvent], activity_type: &str) -> Vec<String> {
    history
        .iter()
        .filter_map(|e| match &e.event {
            WorkflowEvent::ActivityScheduled {
                activity_id,
                activity_type: t,
                ..
            } if t == activity_type => Some(activity_id.clone()),
            _ => None,
        })
        .collect()
}

fn completed(history: &[HistoryEvent], id: &str) -> bool {
    history.iter().any(|e| {
        matches!(&e.event, WorkflowEvent::ActivityCompleted { activity_id, .. } if activity_id == id)
    })
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_cancel_after_three_seconds() {
    let service = service();
    let client = service.client();
    start(client, "wf-cancel", CancelWorkflowInput::default()).await;

    tokio::time::sleep(Duration::from_secs(3)).await;

    let running = client.describe_workflow("wf-cancel").await.unwrap();
    assert_eq!(running.status, WorkflowStatus::Running);
    let pending = running
        .pending_activities
        .values()
        .find(|a| a.activity_type == LongRunningActivity::TYPE)
        .expect("long-running activity should be pending");
    assert!(pending.last_heartbeat_at.is_some());

    let cancelled_at = Instant::now();
    client
        .cancel_workflow("wf-cancel", "operator")
        .await
        .expect("cancel should be accepted");

    let output: CancelWorkflowOutput = client.await_result("wf-cancel").await.unwrap();
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));

    assert!(output.unit_of_work.is_cancelled());
    assert!(output.unit_of_work.ticks() >= 2);
    assert_eq!(
        output.skipped_step,
        Some(SkipReport {
            ran_after_cancellation: true
        })
    );
    assert!(output.cancellation_observed);

    let record = client.describe_workflow("wf-cancel").await.unwrap();
    assert_eq!(record.status, WorkflowStatus::Completed);
    assert_eq!(record.cancel_requested.as_deref(), Some("operator"));

    let history = client.get_history("wf-cancel").await.unwrap();
    assert!(!history.iter().any(|e| e.event.name() == "activity_timed_out"));
    let skippable = scheduled(&history, SkippableActivity::TYPE);
    assert_eq!(skippable.len(), 1);
    assert!(completed(&history, &skippable[0]));
    let cleanup = scheduled(&history, CleanupActivity::TYPE);
    assert_eq!(cleanup.len(), 1);
    assert!(completed(&history, &cleanup[0]));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_start_to_close_timeout_still_runs_cleanup() {
    let service = service();
    let client = service.client();
    start(client, "wf-timeout", CancelWorkflowInput::default()).await;

    let started = Instant::now();
    let result: Result<CancelWorkflowOutput, EngineError> = client.await_result("wf-timeout").await;

    match result {
        Err(EngineError::WorkflowFailed(error)) => {
            assert_eq!(error.timeout_type(), Some(TimeoutType::StartToClose));
        }
        other => panic!("expected start-to-close timeout, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_secs(30 * 60));

    let record = client.describe_workflow("wf-timeout").await.unwrap();
    assert_eq!(record.status, WorkflowStatus::Failed);

    let history = client.get_history("wf-timeout").await.unwrap();
    let cleanup = scheduled(&history, CleanupActivity::TYPE);
    assert_eq!(cleanup.len(), 1);
    assert!(completed(&history, &cleanup[0]));
    assert!(scheduled(&history, SkippableActivity::TYPE).is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_bounded_work_completes() {
    let service = service();
    let client = service.client();
    start(client, "wf-done", CancelWorkflowInput { max_ticks: Some(3) }).await;

    let output: CancelWorkflowOutput = client.await_result("wf-done").await.unwrap();

    assert_eq!(output.unit_of_work, LongRunningOutcome::Completed { ticks: 3 });
    assert_eq!(
        output.skipped_step,
        Some(SkipReport {
            ran_after_cancellation: false
        })
    );
    assert!(!output.cancellation_observed);

    let history = client.get_history("wf-done").await.unwrap();
    assert_eq!(scheduled(&history, CleanupActivity::TYPE).len(), 1);

    let err = client.cancel_workflow("wf-done", "too late").await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowClosed { .. }));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_shutdown_fails_open_runs_and_drains() {
    let service = service();
    let client = service.client().clone();
    start(&client, "wf-shutdown", CancelWorkflowInput::default()).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    service.shutdown().await.expect("worker should drain");

    let record = client.describe_workflow("wf-shutdown").await.unwrap();
    assert_eq!(record.status, WorkflowStatus::Failed);
    assert_eq!(record.error, Some(WorkflowError::EngineShutdown));
    assert!(record.pending_activities.is_empty());
    assert_eq!(service.worker().active_activities(), 0);

    let history = client.get_history("wf-shutdown").await.unwrap();
    let long_running = scheduled(&history, LongRunningActivity::TYPE);
    assert!(history.iter().any(|e| matches!(
        &e.event,
        WorkflowEvent::ActivityCanceled { activity_id } if *activity_id == long_running[0]
    )));
    let cleanup = scheduled(&history, CleanupActivity::TYPE);
    assert_eq!(cleanup.len(), 1);
    assert!(completed(&history, &cleanup[0]));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_slow_heartbeat_interval_is_capped() {
    let config = WorkerServiceConfig {
        worker_id: "test-worker".to_string(),
        heartbeat_interval: Duration::from_secs(20),
        ..Default::default()
    };
    let service = WorkerService::start(config).expect("worker should start");
    let client = service.client();
    start(client, "wf-slow", CancelWorkflowInput { max_ticks: Some(1) }).await;

    let output: CancelWorkflowOutput = client.await_result("wf-slow").await.unwrap();
    assert_eq!(output.unit_of_work, LongRunningOutcome::Completed { ticks: 1 });
}

// ============================================
// Through the admin API
// ============================================

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (u16, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status().as_u16();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_cancel_through_api() {
    let service = service();
    let app = service.router();

    let (status, _) = send(&app, "POST", "/v1/workflows", Some(json!({"workflow_id": "wf-http"}))).await;
    assert_eq!(status, 201);

    tokio::time::sleep(Duration::from_secs(3)).await;

    let (status, body) = send(&app, "POST", "/v1/workflows/wf-http/cancel", None).await;
    assert_eq!(status, 202);
    assert!(body["cancel_requested"].is_string());

    let _: CancelWorkflowOutput = service.client().await_result("wf-http").await.unwrap();

    let (status, body) = send(&app, "GET", "/v1/workflows/wf-http", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["unit_of_work"]["outcome"], "cancelled");
    assert_eq!(body["result"]["skipped_step"]["ran_after_cancellation"], true);

    let (status, _) = send(&app, "POST", "/v1/workflows/wf-http/cancel", None).await;
    assert_eq!(status, 409);
}
