//! Message relay collaborator used by the `notify` handler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StepError;

/// A message handed to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Delivery channel understood by the relay (e.g. "email", "chat").
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Recipient addresses or channel names.
    #[serde(default)]
    pub recipients: Vec<String>,

    /// Subject line.
    #[serde(default)]
    pub subject: String,

    /// Message body.
    pub body: String,
}

fn default_channel() -> String {
    "log".to_string()
}

/// Delivers notifications. One call is one attempt.
#[async_trait]
pub trait MessageRelay: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), StepError>;
}

/// Relay that writes notifications to the log.
#[derive(Debug, Clone, Default)]
pub struct TracingRelay;

#[async_trait]
impl MessageRelay for TracingRelay {
    async fn deliver(&self, notification: &Notification) -> Result<(), StepError> {
        tracing::info!(
            target: "mop::notify",
            channel = %notification.channel,
            recipients = ?notification.recipients,
            subject = %notification.subject,
            "{}",
            notification.body
        );
        Ok(())
    }
}
