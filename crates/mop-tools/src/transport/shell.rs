//! Local shell transport.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;

use super::{CommandOutput, DeviceTransport};
use crate::error::StepError;

/// Runs device commands through a local shell.
///
/// The target device id is exported as `MOP_DEVICE` so wrapper scripts can
/// open their own session to it.
#[derive(Debug, Clone)]
pub struct LocalShellTransport {
    shell: String,
    cwd: Option<String>,
    env: HashMap<String, String>,
}

impl LocalShellTransport {
    /// Create a transport using `bash`.
    pub fn new() -> Self {
        Self {
            shell: "bash".to_string(),
            cwd: None,
            env: HashMap::new(),
        }
    }

    /// Use a different shell binary.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run commands in the given working directory.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable for every command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl Default for LocalShellTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceTransport for LocalShellTransport {
    async fn send_command(
        &self,
        device: &str,
        command: &str,
        timeout_duration: Option<Duration>,
    ) -> Result<CommandOutput, StepError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);

        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd.env("MOP_DEVICE", device);

        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(device = %device, command = %command, shell = %self.shell, "Sending command");

        let mut child = cmd
            .spawn()
            .map_err(|e| StepError::Transport(format!("Failed to spawn process: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Read both streams concurrently so neither pipe fills up
        let stdout_handle = tokio::spawn(drain(stdout));
        let stderr_handle = tokio::spawn(drain(stderr));

        let wait_result = match timeout_duration {
            Some(duration) => match timeout(duration, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(StepError::Timeout(duration.as_secs()));
                }
            },
            None => child.wait().await,
        };

        let status = wait_result
            .map_err(|e| StepError::Transport(format!("Failed to wait for process: {}", e)))?;

        Ok(CommandOutput {
            output: stdout_handle.await.unwrap_or_default(),
            stderr: stderr_handle.await.unwrap_or_default(),
            exit_code: Some(status.code().unwrap_or(-1)),
        })
    }
}

/// Read a pipe to EOF. Invalid UTF-8 is replaced, never truncated.
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut bytes = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut bytes).await {
            tracing::warn!(error = %e, "Failed to read command output");
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_echo_device() {
        let transport = LocalShellTransport::new();
        let out = transport
            .send_command("edge-01", "echo \"hello $MOP_DEVICE\"", None)
            .await
            .unwrap();

        assert!(out.exited_cleanly());
        assert!(out.output.contains("hello edge-01"));
    }

    #[tokio::test]
    async fn test_shell_exit_code() {
        let transport = LocalShellTransport::new();
        let out = transport.send_command("d", "exit 42", None).await.unwrap();

        assert_eq!(out.exit_code, Some(42));
        assert!(!out.exited_cleanly());
    }

    #[tokio::test]
    async fn test_shell_stderr_and_env() {
        let transport = LocalShellTransport::new().with_env("MY_VAR", "my_value");
        let out = transport
            .send_command("d", "echo $MY_VAR; echo 'oops' >&2", None)
            .await
            .unwrap();

        assert!(out.output.contains("my_value"));
        assert!(out.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_shell_keeps_output_after_invalid_utf8() {
        let transport = LocalShellTransport::new();
        let out = transport
            .send_command("d", "printf 'banner \\377\\n'; echo 'after'", None)
            .await
            .unwrap();

        assert!(out.output.contains("banner \u{FFFD}"));
        assert!(out.output.ends_with("after\n"));
    }

    #[tokio::test]
    async fn test_shell_timeout() {
        let transport = LocalShellTransport::new();
        let err = transport
            .send_command("d", "sleep 10", Some(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Timeout(_)));
    }
}
