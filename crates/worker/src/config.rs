// Worker service configuration
//
// Read from the environment (a `.env` file is loaded first by the binary).
// Unset or unparsable values fall back to the defaults.

use std::time::Duration;

use cancelflow_durable::WorkerConfig;
use uuid::Uuid;

use crate::activities::DEFAULT_HEARTBEAT_INTERVAL;
use crate::workflows::HEARTBEAT_TIMEOUT;

/// Longest accepted heartbeat interval
///
/// At least two heartbeats must fit in one heartbeat timeout, otherwise a
/// single delayed tick fails the long-running activity.
pub const MAX_HEARTBEAT_INTERVAL: Duration =
    Duration::from_millis(HEARTBEAT_TIMEOUT.as_millis() as u64 / 2);

/// Task list the sample workflow and its activities are served on
pub const DEFAULT_TASK_LIST: &str = "cancelGroup";

/// Address the admin API binds to by default
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:9000";

/// Configuration for the worker service
#[derive(Debug, Clone)]
pub struct WorkerServiceConfig {
    /// Task list served by the worker (`TASK_LIST`)
    pub task_list: String,
    /// Admin API bind address (`HTTP_ADDR`)
    pub http_addr: String,
    /// Worker ID reported in activity history (`WORKER_ID`)
    pub worker_id: String,
    /// Activity slots (`MAX_CONCURRENT_ACTIVITIES`)
    pub max_concurrent_activities: usize,
    /// Heartbeat interval of the long-running activity (`HEARTBEAT_INTERVAL_MS`)
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for in-flight work (`SHUTDOWN_TIMEOUT_MS`)
    pub shutdown_timeout: Duration,
}

impl Default for WorkerServiceConfig {
    fn default() -> Self {
        Self {
            task_list: DEFAULT_TASK_LIST.to_string(),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            worker_id: format!("worker-{}", Uuid::now_v7()),
            max_concurrent_activities: 10,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerServiceConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_concurrent_activities = non_empty("MAX_CONCURRENT_ACTIVITIES")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_concurrent_activities);

        let heartbeat_interval = non_empty("HEARTBEAT_INTERVAL_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .and_then(|interval| {
                if interval > MAX_HEARTBEAT_INTERVAL {
                    tracing::warn!(
                        interval_ms = interval.as_millis() as u64,
                        max_ms = MAX_HEARTBEAT_INTERVAL.as_millis() as u64,
                        heartbeat_timeout_ms = HEARTBEAT_TIMEOUT.as_millis() as u64,
                        "HEARTBEAT_INTERVAL_MS too close to the heartbeat timeout, using default"
                    );
                    return None;
                }
                Some(interval)
            })
            .unwrap_or(defaults.heartbeat_interval);

        let shutdown_timeout = non_empty("SHUTDOWN_TIMEOUT_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.shutdown_timeout);

        Self {
            task_list: non_empty("TASK_LIST").unwrap_or(defaults.task_list),
            http_addr: non_empty("HTTP_ADDR").unwrap_or(defaults.http_addr),
            worker_id: non_empty("WORKER_ID").unwrap_or(defaults.worker_id),
            max_concurrent_activities,
            heartbeat_interval,
            shutdown_timeout,
        }
    }

    /// Engine worker settings derived from this configuration
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_worker_id(self.worker_id.clone())
            .with_max_concurrent_activities(self.max_concurrent_activities)
            .with_shutdown_timeout(self.shutdown_timeout)
    }
}
