// Workflow commands: trigger, cancel, describe, history, list

use std::collections::BTreeMap;

use crate::client::{Client, ClientError};
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Request to start a run
#[derive(Debug, Serialize)]
struct StartWorkflowRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_ticks: Option<u64>,
}

/// Request to cancel a run
#[derive(Debug, Serialize)]
struct CancelWorkflowRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// Filters for listing runs, sent as query parameters
#[derive(Debug, Serialize)]
struct ListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    workflow_type: Option<String>,
}

/// Started run returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedWorkflow {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub workflow_type: String,
    pub task_list: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub workflow_id: String,
    pub run_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingActivity {
    pub activity_id: String,
    pub activity_type: String,
    pub state: String,
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub heartbeat_details: Option<Value>,
}

/// Run record returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub execution: Execution,
    pub workflow_type: String,
    pub task_list: String,
    #[serde(default)]
    pub input: Value,
    pub status: String,
    #[serde(default)]
    pub cancel_requested: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending_activities: BTreeMap<String, PendingActivity>,
}

/// One history event; fields other than the envelope vary by type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn not_found(workflow_id: &str) -> impl FnOnce(ClientError) -> anyhow::Error + '_ {
    move |e| match e {
        ClientError::NotFound => anyhow::anyhow!("Workflow not found: {}", workflow_id),
        e => e.into(),
    }
}

pub async fn trigger(
    client: &Client,
    output: OutputFormat,
    quiet: bool,
    workflow_id: Option<String>,
    max_ticks: Option<u64>,
) -> Result<()> {
    let request = StartWorkflowRequest {
        workflow_id,
        max_ticks,
    };
    let started: StartedWorkflow = client.post("/v1/workflows", &request).await?;

    if output.is_text() {
        if quiet {
            println!("{}", started.workflow_id);
        } else {
            println!("Started workflow: {}", started.workflow_id);
            print_field("Run", &started.run_id.to_string());
            print_field("Type", &started.workflow_type);
            print_field("Task list", &started.task_list);
            println!();
            println!("Cancel it with: cancelflow cancel {}", started.workflow_id);
        }
    } else {
        output.print_value(&started)?;
    }

    Ok(())
}

pub async fn cancel(
    client: &Client,
    output: OutputFormat,
    quiet: bool,
    workflow_id: &str,
    reason: Option<String>,
) -> Result<()> {
    let run: Run = client
        .post(
            &format!("/v1/workflows/{}/cancel", workflow_id),
            &CancelWorkflowRequest { reason },
        )
        .await
        .map_err(not_found(workflow_id))?;

    if output.is_text() {
        if !quiet {
            println!("Cancellation requested: {}", run.execution.workflow_id);
            print_field("Run", &run.execution.run_id.to_string());
            print_field("Reason", run.cancel_requested.as_deref().unwrap_or("-"));
        }
    } else {
        output.print_value(&run)?;
    }

    Ok(())
}

pub async fn describe(client: &Client, output: OutputFormat, workflow_id: &str) -> Result<()> {
    let run: Run = client
        .get(&format!("/v1/workflows/{}", workflow_id))
        .await
        .map_err(not_found(workflow_id))?;

    if !output.is_text() {
        return output.print_value(&run);
    }

    print_field("Workflow", &run.execution.workflow_id);
    print_field("Run", &run.execution.run_id.to_string());
    print_field("Type", &run.workflow_type);
    print_field("Task list", &run.task_list);
    print_field("Status", &run.status);
    if let Some(reason) = &run.cancel_requested {
        print_field("Cancel", reason);
    }
    print_field("Started", &timestamp(&run.started_at));
    if let Some(closed) = &run.closed_at {
        print_field("Closed", &timestamp(closed));
    }
    if let Some(result) = &run.result {
        print_field("Result", &result.to_string());
    }
    if let Some(error) = &run.error {
        print_field("Error", &error.to_string());
    }

    if !run.pending_activities.is_empty() {
        println!();
        print_table_header(&[
            ("ACTIVITY", 8),
            ("TYPE", 14),
            ("STATE", 16),
            ("LAST HEARTBEAT", 24),
            ("DETAILS", 30),
        ]);
        for activity in run.pending_activities.values() {
            let last_heartbeat = activity
                .last_heartbeat_at
                .as_ref()
                .map(timestamp)
                .unwrap_or_else(|| "-".to_string());
            let details = activity
                .heartbeat_details
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string());
            print_table_row(&[
                (&activity.activity_id, 8),
                (&activity.activity_type, 14),
                (&activity.state, 16),
                (&last_heartbeat, 24),
                (&details, 30),
            ]);
        }
    }

    Ok(())
}

pub async fn history(client: &Client, output: OutputFormat, workflow_id: &str) -> Result<()> {
    let response: ListResponse<HistoryEntry> = client
        .get(&format!("/v1/workflows/{}/history", workflow_id))
        .await
        .map_err(not_found(workflow_id))?;

    if !output.is_text() {
        return output.print_value(&response);
    }

    print_table_header(&[("SEQ", 4), ("EVENT", 26), ("RECORDED", 24), ("DETAILS", 50)]);
    for entry in &response.data {
        let details = Value::Object(entry.fields.clone()).to_string();
        print_table_row(&[
            (&entry.sequence.to_string(), 4),
            (&entry.event_type, 26),
            (&timestamp(&entry.recorded_at), 24),
            (&details, 50),
        ]);
    }

    Ok(())
}

pub async fn list(
    client: &Client,
    output: OutputFormat,
    status: Option<String>,
    workflow_type: Option<String>,
) -> Result<()> {
    let query = ListQuery {
        status,
        workflow_type,
    };
    let response: ListResponse<Run> = client.get_with_query("/v1/workflows", &query).await?;

    if !output.is_text() {
        return output.print_value(&response);
    }

    if response.data.is_empty() {
        println!("No workflows found");
        return Ok(());
    }

    print_table_header(&[("WORKFLOW", 36), ("TYPE", 16), ("STATUS", 10), ("STARTED", 24)]);
    for run in &response.data {
        print_table_row(&[
            (&run.execution.workflow_id, 36),
            (&run.workflow_type, 16),
            (&run.status, 10),
            (&timestamp(&run.started_at), 24),
        ]);
    }

    Ok(())
}
