//! Step execution error types.

use thiserror::Error;

/// Errors that can occur while resolving or running a step handler.
///
/// None of these escape the interpreter: every variant is converted into a
/// `StepResult` with status `error` and routed through `on_failure`.
#[derive(Debug, Error)]
pub enum StepError {
    /// No handler registered under the step type.
    #[error("Unknown step type: {0}")]
    UnknownStepType(String),

    /// A handler with the same type name is already registered.
    #[error("Handler already registered: {0}")]
    DuplicateHandler(String),

    /// Step parameters do not match the handler's schema.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// A template reference could not be resolved against the context.
    #[error("Unresolved reference: {0}")]
    Resolution(String),

    /// The step targets no device but the handler needs one.
    #[error("Step type '{0}' requires a target device")]
    MissingDevice(String),

    /// Device transport fault.
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Message relay fault.
    #[error("Relay error: {0}")]
    Relay(String),

    /// Handler invocation exceeded its timeout.
    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    /// Sandboxed code matched a deny-listed pattern and was not run.
    #[error("Security rejection: code matches deny-listed pattern '{pattern}' ({reason})")]
    SecurityRejection {
        pattern: &'static str,
        reason: &'static str,
    },

    /// Script evaluation error.
    #[error("Script error: {0}")]
    Script(String),

    /// Handler panicked during an invocation.
    #[error("Handler panicked: {0}")]
    Panic(String),

    /// Condition evaluation error.
    #[error("Check error: {0}")]
    Check(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StepError {
    fn from(e: std::io::Error) -> Self {
        StepError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StepError {
    fn from(e: serde_json::Error) -> Self {
        StepError::Json(e.to_string())
    }
}

impl From<reqwest::Error> for StepError {
    fn from(e: reqwest::Error) -> Self {
        StepError::Http(e.to_string())
    }
}

impl From<minijinja::Error> for StepError {
    fn from(e: minijinja::Error) -> Self {
        StepError::Resolution(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StepError::UnknownStepType("reboot".to_string());
        assert_eq!(err.to_string(), "Unknown step type: reboot");

        let err = StepError::Timeout(30);
        assert_eq!(err.to_string(), "Execution timed out after 30 seconds");

        let err = StepError::SecurityRejection {
            pattern: "import",
            reason: "module loading",
        };
        assert!(err.to_string().contains("'import'"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let step_err: StepError = io_err.into();
        assert!(matches!(step_err, StepError::Io(_)));
    }
}
