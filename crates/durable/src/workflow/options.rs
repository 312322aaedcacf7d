//! Activity options

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options for activity execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityOptions {
    /// Task list to dispatch on (defaults to the workflow's task list)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_list: Option<String>,

    /// Maximum time to wait for activity to be picked up by a worker
    #[serde(with = "millis")]
    pub schedule_to_start_timeout: Duration,

    /// Maximum time for activity execution (from start to completion)
    #[serde(with = "millis")]
    pub start_to_close_timeout: Duration,

    /// Maximum gap between heartbeats
    /// If set, the activity must heartbeat within this interval
    #[serde(default, with = "millis::option")]
    pub heartbeat_timeout: Option<Duration>,

    /// Whether the caller waits for the activity's own result after cancellation
    ///
    /// When false, `execute_activity` returns `WorkflowError::Canceled` as soon as
    /// the scheduling context is cancelled.
    #[serde(default)]
    pub wait_for_cancellation: bool,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            task_list: None,
            schedule_to_start_timeout: Duration::from_secs(60),
            start_to_close_timeout: Duration::from_secs(300),
            heartbeat_timeout: None,
            wait_for_cancellation: false,
        }
    }
}

impl ActivityOptions {
    /// Dispatch on a specific task list
    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    /// Set the schedule-to-start timeout
    pub fn with_schedule_to_start_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_start_timeout = timeout;
        self
    }

    /// Set the start-to-close timeout
    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = timeout;
        self
    }

    /// Enable heartbeating with the specified timeout
    pub fn with_heartbeat(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    /// Wait for the activity to acknowledge cancellation
    pub fn with_wait_for_cancellation(mut self, wait: bool) -> Self {
        self.wait_for_cancellation = wait;
        self
    }
}

/// `Duration` fields encoded as integer milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(to_millis(duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    fn to_millis(duration: &Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// Same encoding for `Option<Duration>`, with `None` as null
    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(d) => serializer.serialize_some(&to_millis(d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ActivityOptions::default();
        assert_eq!(options.schedule_to_start_timeout, Duration::from_secs(60));
        assert_eq!(options.start_to_close_timeout, Duration::from_secs(300));
        assert!(options.heartbeat_timeout.is_none());
        assert!(!options.wait_for_cancellation);
        assert!(options.task_list.is_none());
    }

    #[test]
    fn test_activity_options_serialization() {
        let options = ActivityOptions::default()
            .with_start_to_close_timeout(Duration::from_secs(1800))
            .with_heartbeat(Duration::from_secs(30))
            .with_wait_for_cancellation(true);

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["start_to_close_timeout"], 1_800_000);
        assert_eq!(json["heartbeat_timeout"], 30_000);

        let parsed: ActivityOptions = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, options);
    }

    #[test]
    fn test_wait_for_cancellation_defaults_when_missing() {
        let parsed: ActivityOptions = serde_json::from_value(serde_json::json!({
            "schedule_to_start_timeout": 1000,
            "start_to_close_timeout": 2000,
            "heartbeat_timeout": null
        }))
        .unwrap();

        assert!(!parsed.wait_for_cancellation);
        assert_eq!(parsed.start_to_close_timeout, Duration::from_secs(2));
    }
}
