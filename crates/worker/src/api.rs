// HTTP admin API for the worker service
//
// Starts, cancels and inspects runs of the cancel workflow. The CLI talks to
// these routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cancelflow_durable::persistence::{RunFilter, RunRecord, WorkflowStatus};
use cancelflow_durable::workflow::HistoryEvent;
use cancelflow_durable::{Client, EngineError, StartWorkflowOptions, Workflow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflows::{CancelActivityWorkflow, CancelWorkflowInput};

/// Reason recorded when a cancel request does not give one
pub const DEFAULT_CANCEL_REASON: &str = "cancelled by operator";

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub client: Client,
    pub task_list: String,
}

impl AppState {
    pub fn new(client: Client, task_list: impl Into<String>) -> Self {
        Self {
            client,
            task_list: task_list.into(),
        }
    }
}

// ============================================================================
// DTOs
// ============================================================================

/// Standard error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Response wrapper for list endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    task_list: String,
}

/// Request to start a cancel workflow run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartWorkflowRequest {
    /// Workflow ID (generated if omitted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Let the long-running activity finish after this many heartbeats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ticks: Option<u64>,
}

/// A started run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartWorkflowResponse {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub workflow_type: String,
    pub task_list: String,
}

/// Request to cancel a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelWorkflowRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Query parameters for listing runs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListWorkflowsQuery {
    pub status: Option<WorkflowStatus>,
    pub workflow_type: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Engine error mapped onto an HTTP status
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            EngineError::WorkflowAlreadyRunning { .. } | EngineError::WorkflowClosed { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "Request rejected");
        }

        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Routes
// ============================================================================

/// Create admin API routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/workflows", post(start_workflow).get(list_workflows))
        .route("/v1/workflows/:workflow_id", get(describe_workflow))
        .route("/v1/workflows/:workflow_id/history", get(get_history))
        .route("/v1/workflows/:workflow_id/cancel", post(cancel_workflow))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        task_list: state.task_list.clone(),
    })
}

/// POST /v1/workflows - Start a cancel workflow run
pub async fn start_workflow(
    State(state): State<AppState>,
    body: Option<Json<StartWorkflowRequest>>,
) -> Result<(StatusCode, Json<StartWorkflowResponse>), ApiError> {
    let Json(req) = body.unwrap_or_default();

    let mut options = StartWorkflowOptions::new(state.task_list.clone());
    if let Some(workflow_id) = req.workflow_id.filter(|id| !id.is_empty()) {
        options = options.with_workflow_id(workflow_id);
    }

    let execution = state
        .client
        .start::<CancelActivityWorkflow>(
            options,
            CancelWorkflowInput {
                max_ticks: req.max_ticks,
            },
        )
        .await?;

    tracing::info!(
        workflow_id = %execution.workflow_id,
        run_id = %execution.run_id,
        "Started cancel workflow, cancel it with `cancelflow cancel {}`",
        execution.workflow_id
    );

    Ok((
        StatusCode::CREATED,
        Json(StartWorkflowResponse {
            workflow_id: execution.workflow_id,
            run_id: execution.run_id,
            workflow_type: CancelActivityWorkflow::TYPE.to_string(),
            task_list: state.task_list.clone(),
        }),
    ))
}

/// GET /v1/workflows - List runs, most recent first
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<ListResponse<RunRecord>>, ApiError> {
    let filter = RunFilter {
        status: query.status,
        workflow_type: query.workflow_type,
    };
    let runs = state.client.list_workflows(filter).await?;
    Ok(Json(runs.into()))
}

/// GET /v1/workflows/:workflow_id - Describe the latest run
pub async fn describe_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    let record = state.client.describe_workflow(&workflow_id).await?;
    Ok(Json(record))
}

/// GET /v1/workflows/:workflow_id/history - History of the latest run
pub async fn get_history(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<ListResponse<HistoryEvent>>, ApiError> {
    let events = state.client.get_history(&workflow_id).await?;
    Ok(Json(events.into()))
}

/// POST /v1/workflows/:workflow_id/cancel - Request cancellation
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    body: Option<Json<CancelWorkflowRequest>>,
) -> Result<(StatusCode, Json<RunRecord>), ApiError> {
    let Json(req) = body.unwrap_or_default();
    let reason = req
        .reason
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());

    let record = state.client.cancel_workflow(&workflow_id, &reason).await?;
    tracing::info!(
        workflow_id = %workflow_id,
        run_id = %record.execution.run_id,
        reason = %reason,
        "Cancellation requested"
    );

    Ok((StatusCode::ACCEPTED, Json(record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> (Router, Client) {
        let client = Client::in_memory();
        let app = routes(AppState::new(client.clone(), "cancelGroup"));
        (app, client)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let (status, body) = send(&app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["task_list"], "cancelGroup");
    }

    #[tokio::test]
    async fn test_start_and_describe() {
        let (app, _) = app();
        let (status, body) = send(
            &app,
            "POST",
            "/v1/workflows",
            Some(json!({"workflow_id": "wf-api", "max_ticks": 5})),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["workflow_id"], "wf-api");
        assert_eq!(body["workflow_type"], "cancel_activity");

        let (status, body) = send(&app, "GET", "/v1/workflows/wf-api", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["input"], json!({"max_ticks": 5}));
    }

    #[tokio::test]
    async fn test_start_without_body_generates_id() {
        let (app, _) = app();
        let (status, body) = send(&app, "POST", "/v1/workflows", None).await;

        assert_eq!(status, StatusCode::CREATED);
        assert!(!body["workflow_id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_start_conflicts() {
        let (app, _) = app();
        let request = json!({"workflow_id": "wf-dup"});
        send(&app, "POST", "/v1/workflows", Some(request.clone())).await;

        let (status, body) = send(&app, "POST", "/v1/workflows", Some(request)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("wf-dup"));
    }

    #[tokio::test]
    async fn test_cancel_records_reason() {
        let (app, _) = app();
        send(&app, "POST", "/v1/workflows", Some(json!({"workflow_id": "wf-c"}))).await;

        let (status, body) = send(
            &app,
            "POST",
            "/v1/workflows/wf-c/cancel",
            Some(json!({"reason": "operator"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["cancel_requested"], "operator");

        let (status, body) = send(&app, "GET", "/v1/workflows/wf-c/history", None).await;
        assert_eq!(status, StatusCode::OK);
        let types: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["workflow_started", "workflow_cancel_requested"]);
    }

    #[tokio::test]
    async fn test_cancel_without_body_uses_default_reason() {
        let (app, _) = app();
        send(&app, "POST", "/v1/workflows", Some(json!({"workflow_id": "wf-d"}))).await;

        let (status, body) = send(&app, "POST", "/v1/workflows/wf-d/cancel", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["cancel_requested"], DEFAULT_CANCEL_REASON);
    }

    #[tokio::test]
    async fn test_unknown_workflow_not_found() {
        let (app, _) = app();

        let (status, _) = send(&app, "GET", "/v1/workflows/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/v1/workflows/missing/history", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "POST", "/v1/workflows/missing/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let (app, _) = app();
        send(&app, "POST", "/v1/workflows", Some(json!({"workflow_id": "wf-1"}))).await;
        send(&app, "POST", "/v1/workflows", Some(json!({"workflow_id": "wf-2"}))).await;

        let (status, body) = send(&app, "GET", "/v1/workflows", None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["execution"]["workflow_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["wf-2", "wf-1"]);

        let (_, body) = send(&app, "GET", "/v1/workflows?status=completed", None).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_after_shutdown_unavailable() {
        let (app, client) = app();
        client.shutdown().await;

        let (status, _) = send(&app, "POST", "/v1/workflows", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
