//! Device transport collaborator.
//!
//! Command-style handlers talk to devices only through [`DeviceTransport`].
//! Managed-session transports (SSH, NETCONF, vendor APIs) live outside this
//! crate; [`LocalShellTransport`] runs commands on the local host and is
//! what the CLI uses by default.

mod shell;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::StepError;

pub use shell::LocalShellTransport;

/// Output of one command sent to a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Captured output.
    pub output: String,

    /// Error stream, when the transport separates it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,

    /// Exit code, when the transport reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Output with no exit code.
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            stderr: String::new(),
            exit_code: None,
        }
    }

    /// Returns true unless the transport reported a non-zero exit code.
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code.map_or(true, |code| code == 0)
    }
}

/// Sends commands to managed devices.
///
/// One call is one attempt; implementations must not retry.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Run `command` on `device`.
    async fn send_command(
        &self,
        device: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, StepError>;
}
