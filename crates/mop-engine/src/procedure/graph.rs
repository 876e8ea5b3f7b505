//! Validated procedure graph.

use std::collections::HashMap;

use mop_tools::HandlerRegistry;

use super::types::{ProcedureDefinition, StepDefinition};
use super::validate::{self, ValidationError, Violation};

/// A procedure that passed validation, indexed by step id.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureGraph {
    definition: ProcedureDefinition,
    ids: Vec<String>,
    index: HashMap<String, usize>,
}

impl ProcedureGraph {
    /// Validate `definition` and build the graph.
    pub fn new(definition: ProcedureDefinition) -> Result<Self, ValidationError> {
        validate::validate(&definition)?;
        Ok(Self::index(definition))
    }

    /// Build a graph that skips validation, for exercising run-time guards.
    #[cfg(test)]
    pub(crate) fn unchecked(definition: ProcedureDefinition) -> Self {
        Self::index(definition)
    }

    fn index(definition: ProcedureDefinition) -> Self {
        let ids = validate::step_ids(&definition);
        let index = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.clone(), idx))
            .collect();

        Self {
            definition,
            ids,
            index,
        }
    }

    pub fn definition(&self) -> &ProcedureDefinition {
        &self.definition
    }

    pub fn into_definition(self) -> ProcedureDefinition {
        self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Id of the first declared step.
    pub fn entry(&self) -> &str {
        // Validation guarantees at least one step.
        self.ids.first().map(String::as_str).unwrap_or_default()
    }

    /// Resolved step ids in declaration order.
    pub fn step_ids(&self) -> &[String] {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.index.get(id).map(|&idx| &self.definition.steps[idx])
    }

    /// Target devices for a step. Empty means one deviceless invocation.
    pub fn devices_for<'a>(&'a self, step: &'a StepDefinition) -> &'a [String] {
        step.devices.as_deref().unwrap_or(&self.definition.devices)
    }

    /// Re-run structural validation. Never mutates the graph.
    pub fn revalidate(&self) -> Result<(), ValidationError> {
        validate::validate(&self.definition)
    }

    /// Check every step against the handlers available in `registry`.
    pub fn check_handlers(&self, registry: &HandlerRegistry) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        for (step, id) in self.definition.steps.iter().zip(&self.ids) {
            match registry.resolve(&step.step_type) {
                Ok(handler) => {
                    let params = serde_json::Value::Object(step.params.clone());
                    let missing = handler.param_schema().missing_required(&params);
                    if !missing.is_empty() {
                        violations.push(Violation::MissingParams {
                            step: id.clone(),
                            params: missing,
                        });
                    }
                }
                Err(_) => violations.push(Violation::UnknownStepType {
                    step: id.clone(),
                    step_type: step.step_type.clone(),
                }),
            }
        }

        ValidationError::check(violations)
    }
}
