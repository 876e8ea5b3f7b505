//! Procedure definition types.
//!
//! These mirror the authored document field for field:
//!
//! ```yaml
//! name: core-upgrade
//! devices: [edge-01, edge-02]
//! variables:
//!   target_version: "17.3"
//! steps:
//!   - name: Pre-check
//!     id: precheck
//!     type: command
//!     params:
//!       command: show version
//!     on_success: upgrade
//!     on_failure: notify
//! ```

use serde::{Deserialize, Serialize};

/// Key/value map used for step params and procedure variables.
pub type ValueMap = serde_json::Map<String, serde_json::Value>;

/// A procedure as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureDefinition {
    /// Procedure name.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Default target set, in declaration order.
    #[serde(default)]
    pub devices: Vec<String>,

    /// Defaults seeded into the global namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<ValueMap>,

    /// Steps in declaration order. The first one is the entry point.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl ProcedureDefinition {
    /// Create an empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            devices: Vec::new(),
            variables: None,
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the default device list.
    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    /// Add a default variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables
            .get_or_insert_with(ValueMap::new)
            .insert(name.into(), value);
        self
    }
}

/// One step of a procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Display label.
    pub name: String,

    /// Step id. Defaults to the positional index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Handler lookup key.
    #[serde(rename = "type")]
    pub step_type: String,

    /// Handler-specific parameters.
    #[serde(default)]
    pub params: ValueMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,

    /// Per-step target override. `Some([])` runs the step once with no device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<String>>,

    /// Per-invocation timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl StepDefinition {
    /// Create a step with no params or transitions.
    pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            step_type: step_type.into(),
            params: ValueMap::new(),
            on_success: None,
            on_failure: None,
            devices: None,
            timeout_seconds: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the params from a JSON object. Non-object values are ignored.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    pub fn on_success(mut self, target: impl Into<String>) -> Self {
        self.on_success = Some(target.into());
        self
    }

    pub fn on_failure(mut self, target: impl Into<String>) -> Self {
        self.on_failure = Some(target.into());
        self
    }

    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = Some(devices.into_iter().map(Into::into).collect());
        self
    }

    /// Mark the step as deviceless.
    pub fn deviceless(mut self) -> Self {
        self.devices = Some(Vec::new());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_type_field_name() {
        let step: StepDefinition = serde_json::from_value(serde_json::json!({
            "name": "Wait",
            "type": "delay",
            "params": {"seconds": 1}
        }))
        .unwrap();

        assert_eq!(step.step_type, "delay");
        assert!(step.id.is_none());
        assert!(step.devices.is_none());

        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["type"], "delay");
        assert!(value.get("on_success").is_none());
    }

    #[test]
    fn test_builders() {
        let def = ProcedureDefinition::new("p")
            .with_devices(["r1", "r2"])
            .with_variable("x", serde_json::json!(1))
            .with_step(StepDefinition::new("A", "check").with_id("a").deviceless());

        assert_eq!(def.devices, vec!["r1", "r2"]);
        assert_eq!(def.steps[0].devices, Some(vec![]));
        assert_eq!(def.variables.unwrap()["x"], serde_json::json!(1));
    }
}
