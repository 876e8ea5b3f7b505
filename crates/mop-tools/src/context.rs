//! Execution context shared by the steps of one run.
//!
//! The context is owned by a single interpreter run. Handlers never see it
//! mutably: each invocation receives a [`StepScope`] holding a read-only
//! snapshot plus one writable namespace (its device's namespace, or the
//! globals for deviceless steps). The interpreter merges the namespaces back
//! once every invocation of the step has completed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::result::{StepResult, StepStatus};

/// A key/value namespace inside the context.
pub type Namespace = serde_json::Map<String, Value>;

/// Sub-key used in `step_results` for invocations that target no device.
pub const NO_DEVICE: &str = "_";

/// One entry of the append-only step history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Mutable state of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Global variables, seeded from procedure defaults and caller overrides.
    #[serde(default)]
    pub globals: Namespace,

    /// One namespace per target device.
    #[serde(default)]
    pub devices: BTreeMap<String, Namespace>,

    /// Per-invocation results, keyed by step id then device id
    /// ([`NO_DEVICE`] for deviceless invocations).
    #[serde(default)]
    pub step_results: BTreeMap<String, BTreeMap<String, StepResult>>,

    /// Aggregate status of each executed step.
    #[serde(default)]
    pub step_status: BTreeMap<String, StepStatus>,

    /// Ordered record of step visits.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ExecutionContext {
    /// Create a context seeded with the given globals.
    pub fn new(globals: Namespace) -> Self {
        Self {
            globals,
            ..Default::default()
        }
    }

    /// Set a global variable.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Get a global variable.
    pub fn get_global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Get a device namespace.
    pub fn device(&self, device: &str) -> Option<&Namespace> {
        self.devices.get(device)
    }

    /// Replace a device namespace.
    pub fn set_device_namespace(&mut self, device: impl Into<String>, namespace: Namespace) {
        self.devices.insert(device.into(), namespace);
    }

    /// Record the result of one invocation.
    pub fn record_result(&mut self, step_id: &str, device: Option<&str>, result: StepResult) {
        self.step_results
            .entry(step_id.to_string())
            .or_default()
            .insert(device.unwrap_or(NO_DEVICE).to_string(), result);
    }

    /// Look up the result of one invocation.
    pub fn result_for(&self, step_id: &str, device: Option<&str>) -> Option<&StepResult> {
        self.step_results
            .get(step_id)
            .and_then(|by_device| by_device.get(device.unwrap_or(NO_DEVICE)))
    }

    /// Append a history entry.
    pub fn push_history(
        &mut self,
        step_id: impl Into<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) {
        self.history.push(HistoryEntry {
            step_id: step_id.into(),
            started_at,
            finished_at,
        });
    }

    /// Build the `steps` tree exposed to templates and code.
    ///
    /// `steps.<id>.result` points at the invocation for `device` when it
    /// exists, otherwise at the deviceless invocation.
    pub fn steps_tree(&self, device: Option<&str>) -> Value {
        let mut steps = serde_json::Map::new();
        for (step_id, by_device) in &self.step_results {
            let mut entry = serde_json::Map::new();
            if let Some(status) = self.step_status.get(step_id) {
                entry.insert("status".to_string(), serde_json::json!(status));
            }
            entry.insert(
                "results".to_string(),
                serde_json::to_value(by_device).unwrap_or(Value::Null),
            );
            let own = device
                .and_then(|d| by_device.get(d))
                .or_else(|| by_device.get(NO_DEVICE));
            if let Some(result) = own {
                entry.insert(
                    "result".to_string(),
                    serde_json::to_value(result).unwrap_or(Value::Null),
                );
            }
            steps.insert(step_id.clone(), Value::Object(entry));
        }
        Value::Object(steps)
    }
}

/// Device-scoped view of the context handed to one handler invocation.
#[derive(Debug, Clone)]
pub struct StepScope {
    execution_id: Uuid,
    step_id: String,
    device: Option<String>,
    view: Arc<ExecutionContext>,
    vars: Namespace,
}

impl StepScope {
    /// Create a scope; the writable namespace starts as a copy of the
    /// device's namespace (or of the globals when `device` is `None`).
    pub fn new(
        execution_id: Uuid,
        step_id: impl Into<String>,
        device: Option<String>,
        view: Arc<ExecutionContext>,
    ) -> Self {
        let vars = match &device {
            Some(d) => view.device(d).cloned().unwrap_or_default(),
            None => view.globals.clone(),
        };
        Self {
            execution_id,
            step_id: step_id.into(),
            device,
            view,
            vars,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// The device this invocation targets, if any.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Read-only snapshot of the context taken before the step started.
    pub fn context(&self) -> &ExecutionContext {
        &self.view
    }

    /// The writable namespace.
    pub fn vars(&self) -> &Namespace {
        &self.vars
    }

    /// Get a value from the writable namespace.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Set a value in the writable namespace.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.vars.insert(key.into(), value);
    }

    /// Replace the writable namespace wholesale.
    pub fn replace_vars(&mut self, vars: Namespace) {
        self.vars = vars;
    }

    /// Consume the scope, returning the writable namespace.
    pub fn into_vars(self) -> Namespace {
        self.vars
    }

    /// Build the tree that template references resolve against.
    ///
    /// Globals are addressable both at the top level and under `globals`;
    /// reserved names (`globals`, `devices`, `vars`, `steps`, `device`,
    /// `step`, `execution_id`) shadow globals of the same name.
    pub fn template_context(&self) -> Value {
        let ctx = self.context();
        let mut root = ctx.globals.clone();
        root.insert("globals".to_string(), Value::Object(ctx.globals.clone()));
        root.insert(
            "devices".to_string(),
            serde_json::to_value(&ctx.devices).unwrap_or(Value::Null),
        );
        root.insert("vars".to_string(), Value::Object(self.vars.clone()));
        root.insert("steps".to_string(), ctx.steps_tree(self.device()));
        root.insert("step".to_string(), Value::String(self.step_id.clone()));
        root.insert(
            "execution_id".to_string(),
            Value::String(self.execution_id.to_string()),
        );
        match &self.device {
            Some(device) => {
                root.insert("device".to_string(), Value::String(device.clone()));
            }
            None => {
                root.remove("device");
            }
        }
        Value::Object(root)
    }
}
