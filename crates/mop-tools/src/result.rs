//! Step execution result types.

use serde::{Deserialize, Serialize};

use crate::error::StepError;

/// Outcome of a single handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Handler completed and the work held.
    Success,
    /// Handler completed but reports a business failure.
    Failed,
    /// Handler faulted.
    Error,
}

impl StepStatus {
    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Success)
    }

    /// Returns true for both `failed` and `error`.
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Aggregate per-device statuses: any failure dominates.
    ///
    /// An empty set aggregates to `Success`.
    pub fn aggregate<'a>(statuses: impl IntoIterator<Item = &'a StepStatus>) -> StepStatus {
        if statuses.into_iter().any(|s| s.is_failure()) {
            StepStatus::Failed
        } else {
            StepStatus::Success
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of a handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Execution status.
    pub status: StepStatus,

    /// Human-readable summary.
    #[serde(default)]
    pub message: String,

    /// Handler-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,

    /// Invocation duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepResult {
    /// Create a successful result with data.
    pub fn success(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            status: StepStatus::Success,
            message: message.into(),
            data,
            duration_ms: 0,
        }
    }

    /// Create a business-failure result.
    pub fn failed(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            status: StepStatus::Failed,
            message: message.into(),
            data,
            duration_ms: 0,
        }
    }

    /// Create a fault result with no payload.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Error,
            message: message.into(),
            data: serde_json::Value::Null,
            duration_ms: 0,
        }
    }

    /// Set the invocation duration.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Returns true if the result indicates success.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl From<StepError> for StepResult {
    fn from(e: StepError) -> Self {
        StepResult::error(e.to_string())
    }
}
