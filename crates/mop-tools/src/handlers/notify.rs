//! Notification handler.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::context::StepScope;
use crate::error::StepError;
use crate::registry::{ParamKind, ParamSchema, StepHandler};
use crate::relay::{MessageRelay, Notification};
use crate::result::StepResult;

const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 30;

/// Hands a message to the relay collaborator.
pub struct NotifyHandler {
    relay: Arc<dyn MessageRelay>,
}

impl NotifyHandler {
    pub fn new(relay: Arc<dyn MessageRelay>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl StepHandler for NotifyHandler {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn description(&self) -> &'static str {
        "Send a notification through the message relay"
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("body", ParamKind::String, "Message body")
            .optional("subject", ParamKind::String, "Subject line")
            .optional("recipients", ParamKind::Array, "Recipients")
            .optional("channel", ParamKind::String, "Relay channel (default: log)")
            .optional("timeout_seconds", ParamKind::Integer, "Delivery timeout (default 30)")
    }

    async fn execute(
        &self,
        params: &serde_json::Value,
        _scope: &mut StepScope,
    ) -> Result<StepResult, StepError> {
        let notification: Notification = serde_json::from_value(params.clone())
            .map_err(|e| StepError::InvalidParams(format!("Invalid notify params: {}", e)))?;
        let secs = params
            .get("timeout_seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS);

        tokio::time::timeout(Duration::from_secs(secs), self.relay.deliver(&notification))
            .await
            .map_err(|_| StepError::Timeout(secs))??;

        Ok(StepResult::success(
            format!(
                "Notification sent via {} to {} recipient(s)",
                notification.channel,
                notification.recipients.len()
            ),
            serde_json::to_value(&notification)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct CapturingRelay {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl MessageRelay for CapturingRelay {
        async fn deliver(&self, notification: &Notification) -> Result<(), StepError> {
            self.sent.lock().await.push(notification.clone());
            Ok(())
        }
    }

    struct BrokenRelay;

    #[async_trait]
    impl MessageRelay for BrokenRelay {
        async fn deliver(&self, _notification: &Notification) -> Result<(), StepError> {
            Err(StepError::Relay("smtp unavailable".to_string()))
        }
    }

    struct SlowRelay;

    #[async_trait]
    impl MessageRelay for SlowRelay {
        async fn deliver(&self, _notification: &Notification) -> Result<(), StepError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn scope() -> StepScope {
        StepScope::new(uuid::Uuid::new_v4(), "tell", None, Arc::new(ExecutionContext::default()))
    }

    #[tokio::test]
    async fn test_notify_delivers() {
        let relay = Arc::new(CapturingRelay::default());
        let handler = NotifyHandler::new(relay.clone());
        let result = handler
            .execute(
                &serde_json::json!({"body": "done", "recipients": ["noc@example.com"]}),
                &mut scope(),
            )
            .await
            .unwrap();

        assert!(result.is_success());
        let sent = relay.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "done");
    }

    #[tokio::test]
    async fn test_notify_relay_fault_is_error() {
        let err = NotifyHandler::new(Arc::new(BrokenRelay))
            .execute(&serde_json::json!({"body": "x"}), &mut scope())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Relay(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_timeout() {
        let err = NotifyHandler::new(Arc::new(SlowRelay))
            .execute(&serde_json::json!({"body": "x", "timeout_seconds": 1}), &mut scope())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Timeout(1)));
    }
}
