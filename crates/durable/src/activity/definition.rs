//! Activity trait and error type

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::ActivityContext;

/// Failure reported by an activity, or by the worker on its behalf
///
/// Observing cancellation is not a failure. An activity that stops because
/// its context was cancelled returns its own sentinel output instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Human-readable message
    pub message: String,

    /// Machine-readable category, see [`error_types`] for the ones the
    /// worker produces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Structured context, stored verbatim in the run history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// `error_type` values set by the worker and the engine
pub mod error_types {
    /// No activity with the requested type is registered on the worker
    pub const UNKNOWN_ACTIVITY_TYPE: &str = "unknown_activity_type";

    /// The activity input could not be deserialized
    pub const INVALID_INPUT: &str = "invalid_input";

    /// The activity output could not be serialized
    pub const INVALID_OUTPUT: &str = "invalid_output";

    /// The activity panicked
    pub const PANIC: &str = "panic";

    /// The worker dropped the activity without reporting a result
    pub const WORKER_LOST: &str = "worker_lost";
}

impl ActivityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            details: None,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_type(&self, error_type: &str) -> bool {
        self.error_type.as_deref() == Some(error_type)
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{} ({})", self.message, error_type),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Work scheduled by a workflow and executed on a worker
///
/// The worker runs `execute` on its own tokio task with an
/// [`ActivityContext`] whose cancellation token is a child of the
/// scheduling workflow's token. Long-running activities should heartbeat
/// and watch [`ActivityContext::cancelled`].
///
/// # Example
///
/// ```ignore
/// use cancelflow_durable::prelude::*;
///
/// struct DownloadReport;
///
/// #[async_trait]
/// impl Activity for DownloadReport {
///     const TYPE: &'static str = "download_report";
///     type Input = ReportRequest;
///     type Output = DownloadOutcome;
///
///     async fn execute(
///         &self,
///         ctx: &ActivityContext,
///         input: ReportRequest,
///     ) -> Result<DownloadOutcome, ActivityError> {
///         tokio::select! {
///             _ = ctx.cancelled() => Ok(DownloadOutcome::Abandoned),
///             bytes = fetch(&input.url) => Ok(DownloadOutcome::Done(bytes?)),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Name the activity is registered and scheduled under
    const TYPE: &'static str;

    type Input: Serialize + DeserializeOwned + Send;

    type Output: Serialize + DeserializeOwned + Send;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_type() {
        assert_eq!(ActivityError::new("disk full").to_string(), "disk full");
        assert_eq!(
            ActivityError::new("disk full").with_type("io").to_string(),
            "disk full (io)"
        );
    }

    #[test]
    fn test_is_type() {
        let error = ActivityError::new("no such activity")
            .with_type(error_types::UNKNOWN_ACTIVITY_TYPE);

        assert!(error.is_type(error_types::UNKNOWN_ACTIVITY_TYPE));
        assert!(!error.is_type(error_types::PANIC));
        assert!(!ActivityError::new("untyped").is_type(error_types::PANIC));
    }

    #[test]
    fn test_from_anyhow_keeps_context() {
        let error: ActivityError = anyhow::anyhow!("disk full")
            .context("writing report")
            .into();
        assert_eq!(error.message, "writing report: disk full");
        assert!(error.error_type.is_none());
    }

    #[test]
    fn test_serialization_omits_empty_fields() {
        let json = serde_json::to_value(ActivityError::new("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"message": "boom"}));

        let error = ActivityError::new("boom")
            .with_type("io")
            .with_details(serde_json::json!({"path": "/tmp/x"}));
        let back: ActivityError =
            serde_json::from_value(serde_json::to_value(&error).unwrap()).unwrap();
        assert_eq!(back, error);
    }
}
