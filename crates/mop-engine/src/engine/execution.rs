//! Execution record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mop_tools::{ExecutionContext, StepResult};

/// Execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true once the run can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One handler invocation in the execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub result: StepResult,
}

/// One run of a procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: Uuid,

    /// Name of the procedure that was run.
    pub procedure: String,

    pub status: ExecutionStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Invocations in step order, devices sorted within a step.
    pub log: Vec<StepRecord>,

    /// Step ids in the order they were entered.
    pub visited: Vec<String>,

    /// Reason for a fatal abort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Context as it stood when the run ended.
    pub context: ExecutionContext,
}

impl Execution {
    /// A pending execution.
    pub fn new(execution_id: Uuid, procedure: impl Into<String>) -> Self {
        Self {
            execution_id,
            procedure: procedure.into(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            log: Vec::new(),
            visited: Vec::new(),
            error: None,
            context: ExecutionContext::default(),
        }
    }

    /// Results recorded for a step, in device order.
    pub fn results_for(&self, step_id: &str) -> Vec<&StepRecord> {
        self.log.iter().filter(|r| r.step_id == step_id).collect()
    }

    /// Run duration in milliseconds, once finished.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert_eq!(
            serde_json::to_value(ExecutionStatus::Cancelled).unwrap(),
            serde_json::json!("cancelled")
        );
    }

    #[test]
    fn test_results_for() {
        let mut exec = Execution::new(Uuid::new_v4(), "p");
        exec.log.push(StepRecord {
            step_id: "a".into(),
            device: Some("r1".into()),
            result: StepResult::success("ok", serde_json::Value::Null),
        });
        exec.log.push(StepRecord {
            step_id: "b".into(),
            device: None,
            result: StepResult::error("boom"),
        });
        assert_eq!(exec.results_for("a").len(), 1);
        assert!(exec.duration_ms().is_none());
    }
}
