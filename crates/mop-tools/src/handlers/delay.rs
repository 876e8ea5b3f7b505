//! Timed delay handler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::context::StepScope;
use crate::error::StepError;
use crate::registry::{ParamKind, ParamSchema, StepHandler};
use crate::result::StepResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DelayConfig {
    #[serde(default)]
    seconds: Option<f64>,
    #[serde(default)]
    milliseconds: Option<u64>,
}

/// Waits for a fixed amount of time. Never fails once started.
#[derive(Debug, Default)]
pub struct DelayHandler;

#[async_trait]
impl StepHandler for DelayHandler {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn description(&self) -> &'static str {
        "Wait for a fixed duration"
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .optional("seconds", ParamKind::Number, "Seconds to wait")
            .optional("milliseconds", ParamKind::Integer, "Milliseconds to wait")
    }

    async fn execute(
        &self,
        params: &serde_json::Value,
        _scope: &mut StepScope,
    ) -> Result<StepResult, StepError> {
        let config: DelayConfig = serde_json::from_value(params.clone())
            .map_err(|e| StepError::InvalidParams(format!("Invalid delay params: {}", e)))?;

        let duration = match (config.seconds, config.milliseconds) {
            (Some(s), _) => Duration::try_from_secs_f64(s).map_err(|e| {
                StepError::InvalidParams(format!("Invalid delay of {} seconds: {}", s, e))
            })?,
            (None, Some(ms)) => Duration::from_millis(ms),
            (None, None) => {
                return Err(StepError::InvalidParams(
                    "delay step needs 'seconds' or 'milliseconds'".to_string(),
                ))
            }
        };

        tracing::debug!(delay_ms = duration.as_millis() as u64, "Sleeping");
        tokio::time::sleep(duration).await;

        Ok(StepResult::success(
            format!("Waited {} ms", duration.as_millis()),
            serde_json::json!({ "waited_ms": duration.as_millis() as u64 }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use std::sync::Arc;

    fn scope() -> StepScope {
        StepScope::new(uuid::Uuid::new_v4(), "wait", None, Arc::new(ExecutionContext::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_seconds() {
        let result = DelayHandler
            .execute(&serde_json::json!({"seconds": 5}), &mut scope())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.data["waited_ms"], serde_json::json!(5000));
    }

    #[tokio::test]
    async fn test_delay_milliseconds() {
        let result = DelayHandler
            .execute(&serde_json::json!({"milliseconds": 1}), &mut scope())
            .await
            .unwrap();
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_delay_requires_duration() {
        let err = DelayHandler
            .execute(&serde_json::json!({}), &mut scope())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidParams(_)));

        let err = DelayHandler
            .execute(&serde_json::json!({"seconds": -1}), &mut scope())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_delay_rejects_out_of_range_seconds() {
        let err = DelayHandler
            .execute(&serde_json::json!({"seconds": 1e30}), &mut scope())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidParams(_)));
    }
}
