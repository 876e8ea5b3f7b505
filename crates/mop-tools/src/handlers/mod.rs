//! Built-in step handlers.

pub mod check;
pub mod code;
pub mod command;
pub mod delay;
pub mod notify;
pub mod sandbox;
pub mod webhook;

use std::sync::Arc;

pub use check::CheckHandler;
pub use code::CodeHandler;
pub use command::CommandHandler;
pub use delay::DelayHandler;
pub use notify::NotifyHandler;
pub use sandbox::SandboxConfig;
pub use webhook::WebhookHandler;

use crate::error::StepError;
use crate::registry::HandlerRegistry;
use crate::relay::MessageRelay;
use crate::transport::DeviceTransport;

/// Create a registry holding every built-in handler.
pub fn create_default_registry(
    transport: Arc<dyn DeviceTransport>,
    relay: Arc<dyn MessageRelay>,
    sandbox: SandboxConfig,
) -> Result<HandlerRegistry, StepError> {
    let mut registry = HandlerRegistry::new();

    registry.register(CommandHandler::new(transport))?;
    registry.register(DelayHandler)?;
    registry.register(WebhookHandler::new())?;
    registry.register(NotifyHandler::new(relay))?;
    registry.register(CheckHandler)?;
    registry.register(CodeHandler::new(sandbox)?)?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::TracingRelay;
    use crate::transport::LocalShellTransport;

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry(
            Arc::new(LocalShellTransport::new()),
            Arc::new(TracingRelay),
            SandboxConfig::default(),
        )
        .unwrap();

        assert_eq!(
            registry.list(),
            vec!["check", "code", "command", "delay", "notify", "webhook"]
        );
    }

    #[test]
    fn test_builtin_cannot_be_registered_twice() {
        let mut registry = create_default_registry(
            Arc::new(LocalShellTransport::new()),
            Arc::new(TracingRelay),
            SandboxConfig::default(),
        )
        .unwrap();

        let err = registry.register(DelayHandler).unwrap_err();
        assert!(matches!(err, StepError::DuplicateHandler(name) if name == "delay"));
    }
}
