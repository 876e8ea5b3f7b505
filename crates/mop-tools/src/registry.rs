//! Step handler registry and dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::StepScope;
use crate::error::StepError;
use crate::result::StepResult;

/// Kind of a handler parameter, for external tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Any JSON value.
    Any,
}

/// Description of one handler parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// Parameter schema published by a handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    pub params: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required parameter.
    pub fn required(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        });
        self
    }

    /// Add an optional parameter.
    pub fn optional(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        });
        self
    }

    /// Names of required parameters missing from `params`.
    pub fn missing_required(&self, params: &serde_json::Value) -> Vec<String> {
        self.params
            .iter()
            .filter(|p| p.required)
            .filter(|p| params.get(&p.name).map_or(true, |v| v.is_null()))
            .map(|p| p.name.clone())
            .collect()
    }
}

/// A typed step handler.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// The step type name this handler is registered under.
    fn name(&self) -> &'static str;

    /// One-line description for external tooling.
    fn description(&self) -> &'static str;

    /// Parameter schema for external tooling and pre-run checks.
    fn param_schema(&self) -> ParamSchema;

    /// Parameters passed through without template resolution.
    fn raw_params(&self) -> &'static [&'static str] {
        &[]
    }

    /// Execute one invocation. `params` have already been resolved.
    async fn execute(
        &self,
        params: &serde_json::Value,
        scope: &mut StepScope,
    ) -> Result<StepResult, StepError>;
}

/// Handler metadata as exposed to external tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerInfo {
    pub name: String,
    pub description: String,
    pub params: ParamSchema,
}

/// Registry of available step handlers.
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Register a handler. A second registration under the same name is
    /// rejected and leaves the first in place.
    pub fn register<H: StepHandler + 'static>(&mut self, handler: H) -> Result<(), StepError> {
        self.register_arc(Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn register_arc(&mut self, handler: Arc<dyn StepHandler>) -> Result<(), StepError> {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(StepError::DuplicateHandler(name));
        }
        tracing::debug!(handler = %name, "Registered step handler");
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Resolve a handler by step type.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn StepHandler>, StepError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| StepError::UnknownStepType(name.to_string()))
    }

    /// Check if a handler is registered.
    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// List all registered step types, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    /// Metadata for every registered handler.
    pub fn describe(&self) -> Vec<HandlerInfo> {
        self.handlers
            .values()
            .map(|h| HandlerInfo {
                name: h.name().to_string(),
                description: h.description().to_string(),
                params: h.param_schema(),
            })
            .collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
