//! Named task lists connecting the engine to workers

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::activity::{ActivityError, HeartbeatPayload};
use crate::workflow::{ActivityOptions, TraceContext, WorkflowInfo};

/// A workflow run waiting for a worker
pub(crate) struct WorkflowTask {
    pub info: WorkflowInfo,
    pub input: serde_json::Value,
    /// The run's cancellation token
    pub cancel: CancellationToken,
    pub trace_context: TraceContext,
}

/// An activity invocation waiting for a worker
///
/// The channels connect the worker back to the dispatching workflow. The
/// worker sends its ID on `started_tx` before running the activity and the
/// outcome on `result_tx` afterwards.
pub(crate) struct ActivityTask {
    pub info: WorkflowInfo,
    pub activity_id: String,
    pub activity_type: String,
    pub input: serde_json::Value,
    pub options: ActivityOptions,
    pub scheduled_at: DateTime<Utc>,
    /// Child of the scheduling context's token
    pub cancel: CancellationToken,
    pub trace_context: TraceContext,
    pub started_tx: oneshot::Sender<String>,
    pub heartbeat_tx: mpsc::Sender<HeartbeatPayload>,
    pub result_tx: oneshot::Sender<Result<serde_json::Value, ActivityError>>,
}

impl ActivityTask {
    /// Whether the dispatcher stopped waiting for this task to start
    pub fn is_abandoned(&self) -> bool {
        self.started_tx.is_closed()
    }
}

/// FIFO queues of workflow and activity tasks sharing one name
///
/// Any number of workers may poll the same task list; each task is handed
/// to exactly one of them.
pub(crate) struct TaskList {
    name: String,
    workflow_tx: mpsc::UnboundedSender<WorkflowTask>,
    workflow_rx: Mutex<mpsc::UnboundedReceiver<WorkflowTask>>,
    activity_tx: mpsc::UnboundedSender<ActivityTask>,
    activity_rx: Mutex<mpsc::UnboundedReceiver<ActivityTask>>,
}

impl TaskList {
    pub fn new(name: impl Into<String>) -> Self {
        let (workflow_tx, workflow_rx) = mpsc::unbounded_channel();
        let (activity_tx, activity_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            workflow_tx,
            workflow_rx: Mutex::new(workflow_rx),
            activity_tx,
            activity_rx: Mutex::new(activity_rx),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push_workflow(&self, task: WorkflowTask) -> bool {
        self.workflow_tx.send(task).is_ok()
    }

    pub fn push_activity(&self, task: ActivityTask) -> bool {
        self.activity_tx.send(task).is_ok()
    }

    /// Wait for the next workflow task
    pub async fn next_workflow(&self) -> Option<WorkflowTask> {
        self.workflow_rx.lock().await.recv().await
    }

    /// Wait for the next activity task
    pub async fn next_activity(&self) -> Option<ActivityTask> {
        self.activity_rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowExecution;
    use uuid::Uuid;

    fn info() -> WorkflowInfo {
        WorkflowInfo {
            workflow_execution: WorkflowExecution::new("wf-1", Uuid::now_v7()),
            workflow_type: "test_workflow".to_string(),
            task_list: "default".to_string(),
            started_at: Utc::now(),
        }
    }

    fn activity_task() -> (ActivityTask, oneshot::Receiver<String>) {
        let (started_tx, started_rx) = oneshot::channel();
        let (heartbeat_tx, _) = mpsc::channel(1);
        let (result_tx, _) = oneshot::channel();
        let task = ActivityTask {
            info: info(),
            activity_id: "0".to_string(),
            activity_type: "long_running".to_string(),
            input: serde_json::json!({}),
            options: ActivityOptions::default(),
            scheduled_at: Utc::now(),
            cancel: CancellationToken::new(),
            trace_context: TraceContext::new(),
            started_tx,
            heartbeat_tx,
            result_tx,
        };
        (task, started_rx)
    }

    #[tokio::test]
    async fn test_tasks_delivered_in_order() {
        let list = TaskList::new("default");

        for activity_id in ["0", "1"] {
            let (mut task, _) = activity_task();
            task.activity_id = activity_id.to_string();
            assert!(list.push_activity(task));
        }

        assert_eq!(list.next_activity().await.unwrap().activity_id, "0");
        assert_eq!(list.next_activity().await.unwrap().activity_id, "1");
    }

    #[tokio::test]
    async fn test_workflow_task_roundtrip() {
        let list = TaskList::new("default");
        assert!(list.push_workflow(WorkflowTask {
            info: info(),
            input: serde_json::json!({"max_ticks": 3}),
            cancel: CancellationToken::new(),
            trace_context: TraceContext::new(),
        }));

        let task = list.next_workflow().await.unwrap();
        assert_eq!(task.info.workflow_execution.workflow_id, "wf-1");
        assert_eq!(task.input["max_ticks"], 3);
    }

    #[test]
    fn test_abandoned_task() {
        let (task, started_rx) = activity_task();
        assert!(!task.is_abandoned());

        drop(started_rx);
        assert!(task.is_abandoned());
    }
}
