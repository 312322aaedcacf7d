//! Run history events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActivityOptions, WorkflowError};
use crate::activity::ActivityError;

/// Which activity timeout fired
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutType {
    /// No worker picked the activity up in time
    ScheduleToStart,
    /// The activity ran past its deadline
    StartToClose,
    /// The activity went quiet for longer than the heartbeat timeout
    Heartbeat,
}

impl std::fmt::Display for TimeoutType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ScheduleToStart => "schedule_to_start",
            Self::StartToClose => "start_to_close",
            Self::Heartbeat => "heartbeat",
        })
    }
}

/// One entry of a run's append-only history
///
/// The store folds these into the run record; nothing else mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    // Run lifecycle
    WorkflowStarted {
        workflow_type: String,
        input: serde_json::Value,
    },

    /// Recorded once, for the first cancellation request
    WorkflowCancelRequested {
        reason: String,
    },

    WorkflowCompleted {
        result: serde_json::Value,
    },

    WorkflowFailed {
        error: WorkflowError,
    },

    // Activity lifecycle; activity IDs are unique within a run
    ActivityScheduled {
        activity_id: String,
        activity_type: String,
        input: serde_json::Value,
        /// Options in effect for this call, timeouts included
        options: ActivityOptions,
    },

    ActivityStarted {
        activity_id: String,
        /// Always 1; activities are not retried
        attempt: u32,
        worker_id: String,
    },

    ActivityCompleted {
        activity_id: String,
        result: serde_json::Value,
    },

    ActivityFailed {
        activity_id: String,
        error: ActivityError,
    },

    ActivityTimedOut {
        activity_id: String,
        timeout_type: TimeoutType,
    },

    /// The run was cancelled while the activity was running; its token
    /// has been cancelled
    ActivityCancelRequested {
        activity_id: String,
    },

    /// The workflow stopped waiting for a cancelled activity
    ActivityCanceled {
        activity_id: String,
    },
}

impl WorkflowEvent {
    /// Activity the event belongs to, if any
    pub fn activity_id(&self) -> Option<&str> {
        match self {
            Self::ActivityScheduled { activity_id, .. }
            | Self::ActivityStarted { activity_id, .. }
            | Self::ActivityCompleted { activity_id, .. }
            | Self::ActivityFailed { activity_id, .. }
            | Self::ActivityTimedOut { activity_id, .. }
            | Self::ActivityCancelRequested { activity_id }
            | Self::ActivityCanceled { activity_id } => Some(activity_id),
            _ => None,
        }
    }

    /// Whether the event closes the run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. } | Self::WorkflowFailed { .. }
        )
    }

    /// Whether the event removes the activity from the pending set
    pub fn closes_activity(&self) -> bool {
        matches!(
            self,
            Self::ActivityCompleted { .. }
                | Self::ActivityFailed { .. }
                | Self::ActivityTimedOut { .. }
                | Self::ActivityCanceled { .. }
        )
    }

    /// Short snake_case name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::WorkflowCancelRequested { .. } => "workflow_cancel_requested",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::ActivityScheduled { .. } => "activity_scheduled",
            Self::ActivityStarted { .. } => "activity_started",
            Self::ActivityCompleted { .. } => "activity_completed",
            Self::ActivityFailed { .. } => "activity_failed",
            Self::ActivityTimedOut { .. } => "activity_timed_out",
            Self::ActivityCancelRequested { .. } => "activity_cancel_requested",
            Self::ActivityCanceled { .. } => "activity_canceled",
        }
    }
}

/// A history event with its position in the run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEvent {
    /// 1-based position in the run's history
    pub sequence: u64,

    /// When the event was appended
    pub recorded_at: DateTime<Utc>,

    /// The event itself
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workflow_event_serialization() {
        let event = WorkflowEvent::WorkflowStarted {
            workflow_type: "cancel_activity".to_string(),
            input: json!({"max_ticks": null}),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"workflow_started\""));

        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_history_event_flattens_event() {
        let event = HistoryEvent {
            sequence: 3,
            recorded_at: Utc::now(),
            event: WorkflowEvent::ActivityTimedOut {
                activity_id: "0".to_string(),
                timeout_type: TimeoutType::StartToClose,
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "activity_timed_out");
        assert_eq!(json["timeout_type"], "start_to_close");
        assert_eq!(json["sequence"], 3);

        let parsed: HistoryEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_activity_id_extraction() {
        let event = WorkflowEvent::ActivityStarted {
            activity_id: "my-activity".to_string(),
            attempt: 1,
            worker_id: "worker-1".to_string(),
        };
        assert_eq!(event.activity_id(), Some("my-activity"));

        let cancel = WorkflowEvent::ActivityCancelRequested {
            activity_id: "1".to_string(),
        };
        assert_eq!(cancel.activity_id(), Some("1"));

        let start_event = WorkflowEvent::WorkflowCancelRequested {
            reason: "operator".to_string(),
        };
        assert_eq!(start_event.activity_id(), None);
    }

    #[test]
    fn test_is_terminal() {
        assert!(WorkflowEvent::WorkflowCompleted { result: json!({}) }.is_terminal());
        assert!(WorkflowEvent::WorkflowFailed {
            error: WorkflowError::Canceled
        }
        .is_terminal());

        assert!(!WorkflowEvent::WorkflowCancelRequested {
            reason: "cancelled".to_string()
        }
        .is_terminal());
        assert!(!WorkflowEvent::ActivityCompleted {
            activity_id: "x".to_string(),
            result: json!({})
        }
        .is_terminal());
    }

    #[test]
    fn test_closes_activity() {
        assert!(WorkflowEvent::ActivityCanceled {
            activity_id: "0".to_string()
        }
        .closes_activity());
        assert!(!WorkflowEvent::ActivityCancelRequested {
            activity_id: "0".to_string()
        }
        .closes_activity());
    }

    #[test]
    fn test_timeout_type_display() {
        assert_eq!(TimeoutType::Heartbeat.to_string(), "heartbeat");
        assert_eq!(TimeoutType::ScheduleToStart.to_string(), "schedule_to_start");
    }
}
