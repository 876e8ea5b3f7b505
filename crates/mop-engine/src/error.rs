//! Error types for the procedure engine.

use thiserror::Error;

use crate::procedure::ValidationError;

/// Engine-level errors.
///
/// Step faults never appear here: they are captured as `error` step results
/// and routed through `on_failure`. Only faults that prevent a run from
/// starting or that break graph integrity are surfaced.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Procedure document could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Procedure definition is invalid; no step was run.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A transition named a step that does not exist.
    #[error("Step '{from}' transitions to unknown step '{target}'")]
    UnknownTransitionTarget { from: String, target: String },

    /// A step was reached more often than the revisit budget allows.
    #[error("Step '{step}' reached {visits} times, budget is {budget}")]
    RevisitBudgetExceeded {
        step: String,
        visits: u32,
        budget: u32,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown execution id.
    #[error("Execution not found: {0}")]
    NotFound(String),

    /// The background task of a submitted run ended without a result.
    #[error("Execution task failed: {0}")]
    TaskFailed(String),

    /// Handler registry setup failed.
    #[error("Handler error: {0}")]
    Handler(#[from] mop_tools::StepError),
}

impl From<envy::Error> for EngineError {
    fn from(e: envy::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::Violation;

    #[test]
    fn test_error_display() {
        let err = EngineError::RevisitBudgetExceeded {
            step: "a".to_string(),
            visits: 2,
            budget: 1,
        };
        assert_eq!(err.to_string(), "Step 'a' reached 2 times, budget is 1");

        let err: EngineError = ValidationError {
            violations: vec![Violation::NoSteps],
        }
        .into();
        assert_eq!(err.to_string(), "invalid procedure: procedure has no steps");
    }
}
