//! Device command handler.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::context::StepScope;
use crate::error::StepError;
use crate::registry::{ParamKind, ParamSchema, StepHandler};
use crate::result::StepResult;
use crate::transport::{CommandOutput, DeviceTransport};

/// How command output is turned into structured data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Keep the raw text.
    #[default]
    Text,
    /// Parse the output as a JSON document.
    Json,
    /// Split into trimmed, non-empty lines.
    Lines,
}

/// Command step parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Single command to run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Several commands, run in order on the same device.
    #[serde(default)]
    pub commands: Vec<String>,

    /// Pattern that must appear in the combined output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect: Option<String>,

    /// Pattern that must not appear in the combined output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject: Option<String>,

    /// Output parsing.
    #[serde(default)]
    pub parse: ParseMode,

    /// Transport timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl CommandConfig {
    fn command_list(&self) -> Vec<String> {
        let mut list = Vec::new();
        if let Some(cmd) = &self.command {
            list.push(cmd.clone());
        }
        list.extend(self.commands.iter().cloned());
        list
    }
}

/// Runs commands on the target device through the transport.
pub struct CommandHandler {
    transport: Arc<dyn DeviceTransport>,
}

impl CommandHandler {
    pub fn new(transport: Arc<dyn DeviceTransport>) -> Self {
        Self { transport }
    }

    fn parse_config(params: &serde_json::Value) -> Result<CommandConfig, StepError> {
        let config: CommandConfig = serde_json::from_value(params.clone())
            .map_err(|e| StepError::InvalidParams(format!("Invalid command params: {}", e)))?;
        if config.command_list().is_empty() {
            return Err(StepError::InvalidParams(
                "command step needs 'command' or 'commands'".to_string(),
            ));
        }
        Ok(config)
    }
}

/// Output patterns are multi-line: `^` and `$` anchor at line boundaries.
fn compile(pattern: Option<&str>, field: &str) -> Result<Option<Regex>, StepError> {
    pattern
        .map(|p| {
            RegexBuilder::new(p)
                .multi_line(true)
                .build()
                .map_err(|e| StepError::InvalidParams(format!("Invalid '{}' pattern: {}", field, e)))
        })
        .transpose()
}

fn parse_output(mode: ParseMode, output: &str) -> Result<serde_json::Value, StepError> {
    match mode {
        ParseMode::Text => Ok(serde_json::Value::Null),
        ParseMode::Json => serde_json::from_str(output)
            .map_err(|e| StepError::InvalidParams(format!("Output is not valid JSON: {}", e))),
        ParseMode::Lines => Ok(serde_json::json!(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>())),
    }
}

#[async_trait]
impl StepHandler for CommandHandler {
    fn name(&self) -> &'static str {
        "command"
    }

    fn description(&self) -> &'static str {
        "Run one or more commands on the target device"
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .optional("command", ParamKind::String, "Command to run")
            .optional("commands", ParamKind::Array, "Commands to run in order")
            .optional(
                "expect",
                ParamKind::String,
                "Regex that must match the output; ^ and $ match at line boundaries",
            )
            .optional(
                "reject",
                ParamKind::String,
                "Regex that must not match the output; ^ and $ match at line boundaries",
            )
            .optional("parse", ParamKind::String, "text, json or lines")
            .optional("timeout_seconds", ParamKind::Integer, "Transport timeout")
    }

    async fn execute(
        &self,
        params: &serde_json::Value,
        scope: &mut StepScope,
    ) -> Result<StepResult, StepError> {
        let device = scope
            .device()
            .ok_or_else(|| StepError::MissingDevice(self.name().to_string()))?
            .to_string();
        let config = Self::parse_config(params)?;
        let expect = compile(config.expect.as_deref(), "expect")?;
        let reject = compile(config.reject.as_deref(), "reject")?;
        let timeout = config.timeout_seconds.map(Duration::from_secs);

        let mut combined = String::new();
        let mut outputs: Vec<CommandOutput> = Vec::new();
        for command in config.command_list() {
            let out = self.transport.send_command(&device, &command, timeout).await?;
            combined.push_str(&out.output);
            let clean = out.exited_cleanly();
            let code = out.exit_code;
            outputs.push(out);

            if !clean {
                return Ok(StepResult::failed(
                    format!("'{}' exited with code {}", command, code.unwrap_or(-1)),
                    serde_json::json!({ "stdout": combined, "outputs": outputs }),
                ));
            }
        }

        let parsed = parse_output(config.parse, &combined)?;
        let data = serde_json::json!({
            "stdout": combined,
            "outputs": outputs,
            "parsed": parsed,
        });

        if let Some(re) = &expect {
            if !re.is_match(&combined) {
                return Ok(StepResult::failed(
                    format!("Output did not match expected pattern '{}'", re.as_str()),
                    data,
                ));
            }
        }
        if let Some(re) = &reject {
            if re.is_match(&combined) {
                return Ok(StepResult::failed(
                    format!("Output matched rejected pattern '{}'", re.as_str()),
                    data,
                ));
            }
        }

        Ok(StepResult::success(
            format!("{} command(s) completed on {}", outputs.len(), device),
            data,
        ))
    }
}
