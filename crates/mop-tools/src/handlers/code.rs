//! Sandboxed code handler backed by Rhai.
//!
//! Scripts see the following variables:
//!
//! | name | access | contents |
//! |------|--------|----------|
//! | `globals` | read | global variables |
//! | `devices` | read | every device namespace |
//! | `steps` | read | `steps.<id>.status/results/result` |
//! | `device` | read | target device id, `()` when deviceless |
//! | `vars` | read-write | the invocation's writable namespace |
//! | `args` | read | the step's `args` param |
//!
//! Changes to `vars` are written back after a successful run. A script that
//! evaluates to `false` reports a business failure; a thrown error is a
//! handler fault. See [`super::sandbox`] for the limits of the isolation.

use async_trait::async_trait;
use rhai::{Dynamic, Engine, Scope};
use serde::Deserialize;
use std::sync::Arc;

use super::sandbox::{DenyList, SandboxConfig};
use crate::context::{Namespace, StepScope};
use crate::error::StepError;
use crate::registry::{ParamKind, ParamSchema, StepHandler};
use crate::result::StepResult;

#[derive(Debug, Clone, Deserialize)]
struct CodeConfig {
    code: String,
    #[serde(default)]
    args: serde_json::Value,
}

/// Inputs copied out of the step scope for the blocking script thread.
struct ScriptInput {
    code: String,
    args: serde_json::Value,
    globals: serde_json::Value,
    devices: serde_json::Value,
    steps: serde_json::Value,
    device: Option<String>,
    vars: Namespace,
    execution_id: String,
    step: String,
}

struct ScriptOutput {
    value: serde_json::Value,
    vars: Namespace,
}

/// Runs user-supplied Rhai code against the execution context.
pub struct CodeHandler {
    deny: Arc<DenyList>,
    limits: SandboxConfig,
}

impl CodeHandler {
    pub fn new(limits: SandboxConfig) -> Result<Self, StepError> {
        Ok(Self {
            deny: Arc::new(DenyList::new()?),
            limits,
        })
    }

    /// Create an engine with the sandbox applied and helper functions registered.
    fn create_engine(limits: &SandboxConfig) -> Engine {
        let mut engine = Engine::new();
        limits.apply(&mut engine);

        engine.on_print(|msg| tracing::info!(target: "mop::code", "{}", msg));
        engine.on_debug(|msg, _source, _pos| tracing::debug!(target: "mop::code", "{}", msg));

        engine.register_fn("log", |msg: &str| {
            tracing::info!(target: "mop::code", "{}", msg);
        });
        engine.register_fn("info", |msg: &str| {
            tracing::info!(target: "mop::code", "{}", msg);
        });
        engine.register_fn("warn", |msg: &str| {
            tracing::warn!(target: "mop::code", "{}", msg);
        });
        engine.register_fn("error", |msg: &str| {
            tracing::error!(target: "mop::code", "{}", msg);
        });

        engine.register_fn("timestamp", || chrono::Utc::now().timestamp());
        engine.register_fn("timestamp_ms", || chrono::Utc::now().timestamp_millis());
        engine.register_fn("now_iso", || chrono::Utc::now().to_rfc3339());

        engine.register_fn("parse_json", |s: &str| -> Dynamic {
            match serde_json::from_str::<serde_json::Value>(s) {
                Ok(v) => json_to_dynamic(&v),
                Err(_) => Dynamic::UNIT,
            }
        });
        engine.register_fn("to_json", |val: Dynamic| -> String {
            serde_json::to_string(&dynamic_to_json(&val)).unwrap_or_else(|_| "null".to_string())
        });

        engine
    }

    fn run_script(limits: &SandboxConfig, input: ScriptInput) -> Result<ScriptOutput, StepError> {
        let engine = Self::create_engine(limits);
        let mut scope = Scope::new();

        scope.push_constant("globals", json_to_dynamic(&input.globals));
        scope.push_constant("devices", json_to_dynamic(&input.devices));
        scope.push_constant("steps", json_to_dynamic(&input.steps));
        scope.push_constant("args", json_to_dynamic(&input.args));
        scope.push_constant("execution_id", input.execution_id);
        scope.push_constant("step", input.step);
        match input.device {
            Some(device) => scope.push_constant("device", device),
            None => scope.push_constant("device", ()),
        };
        scope.push("vars", json_to_dynamic(&serde_json::Value::Object(input.vars)));

        let value = engine
            .eval_with_scope::<Dynamic>(&mut scope, &input.code)
            .map_err(|e| StepError::Script(e.to_string()))?;

        let vars = match scope.get_value::<rhai::Map>("vars") {
            Some(map) => match dynamic_to_json(&Dynamic::from(map)) {
                serde_json::Value::Object(obj) => obj,
                _ => Namespace::new(),
            },
            None => {
                return Err(StepError::Script("'vars' must remain a map".to_string()));
            }
        };

        Ok(ScriptOutput {
            value: dynamic_to_json(&value),
            vars,
        })
    }
}

#[async_trait]
impl StepHandler for CodeHandler {
    fn name(&self) -> &'static str {
        "code"
    }

    fn description(&self) -> &'static str {
        "Run sandboxed Rhai code against the execution context"
    }

    fn param_schema(&self) -> ParamSchema {
        ParamSchema::new()
            .required("code", ParamKind::String, "Rhai source")
            .optional("args", ParamKind::Object, "Values exposed to the script as `args`")
    }

    fn raw_params(&self) -> &'static [&'static str] {
        &["code"]
    }

    async fn execute(
        &self,
        params: &serde_json::Value,
        scope: &mut StepScope,
    ) -> Result<StepResult, StepError> {
        let config: CodeConfig = serde_json::from_value(params.clone())
            .map_err(|e| StepError::InvalidParams(format!("Invalid code params: {}", e)))?;

        self.deny.scan(&config.code)?;

        let ctx = scope.context();
        let input = ScriptInput {
            code: config.code,
            args: config.args,
            globals: serde_json::Value::Object(ctx.globals.clone()),
            devices: serde_json::to_value(&ctx.devices)?,
            steps: ctx.steps_tree(scope.device()),
            device: scope.device().map(str::to_string),
            vars: scope.vars().clone(),
            execution_id: scope.execution_id().to_string(),
            step: scope.step_id().to_string(),
        };

        tracing::debug!(
            step = %scope.step_id(),
            device = ?scope.device(),
            code_len = input.code.len(),
            "Executing sandboxed code"
        );

        let limits = self.limits.clone();
        let output = tokio::task::spawn_blocking(move || Self::run_script(&limits, input))
            .await
            .map_err(|e| StepError::Script(format!("Task join error: {}", e)))??;

        scope.replace_vars(output.vars);

        if output.value == serde_json::Value::Bool(false) {
            Ok(StepResult::failed("Code returned false", output.value))
        } else {
            Ok(StepResult::success("Code completed", output.value))
        }
    }
}

fn json_to_dynamic(value: &serde_json::Value) -> Dynamic {
    match value {
        serde_json::Value::Null => Dynamic::UNIT,
        serde_json::Value::Bool(b) => Dynamic::from(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        serde_json::Value::String(s) => Dynamic::from(s.clone()),
        serde_json::Value::Array(arr) => {
            let rhai_arr: rhai::Array = arr.iter().map(json_to_dynamic).collect();
            Dynamic::from(rhai_arr)
        }
        serde_json::Value::Object(obj) => {
            let mut map = rhai::Map::new();
            for (k, v) in obj {
                map.insert(k.as_str().into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

fn dynamic_to_json(value: &Dynamic) -> serde_json::Value {
    if value.is_unit() {
        serde_json::Value::Null
    } else if let Ok(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        serde_json::Value::Number(i.into())
    } else if let Ok(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else if value.is_string() {
        serde_json::Value::String(value.clone().into_string().unwrap_or_default())
    } else if value.is_array() {
        let arr = value.clone().into_array().unwrap_or_default();
        serde_json::Value::Array(arr.iter().map(dynamic_to_json).collect())
    } else if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_json(&v)))
                .collect(),
        )
    } else {
        serde_json::Value::String(value.to_string())
    }
}
