//! Procedure document parser.
//!
//! Documents are YAML; JSON is accepted too since it is a YAML subset.
//! Parsing validates: a definition that fails validation is never returned.

use super::graph::ProcedureGraph;
use super::types::ProcedureDefinition;
use crate::error::{EngineError, EngineResult};

/// Parse a YAML or JSON document into a definition, without validating it.
pub fn parse_definition(content: &str) -> EngineResult<ProcedureDefinition> {
    let definition: ProcedureDefinition = serde_yaml::from_str(content)?;
    Ok(definition)
}

/// Parse and validate a document.
pub fn parse_procedure(content: &str) -> EngineResult<ProcedureGraph> {
    let definition = parse_definition(content)?;
    Ok(ProcedureGraph::new(definition)?)
}

/// Read and parse a procedure file.
pub fn load_procedure(path: impl AsRef<std::path::Path>) -> EngineResult<ProcedureGraph> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Parse(format!("{}: {}", path.display(), e)))?;
    parse_procedure(&content)
}

/// Serialize a definition to YAML.
pub fn to_yaml(definition: &ProcedureDefinition) -> EngineResult<String> {
    Ok(serde_yaml::to_string(definition)?)
}

/// Serialize a definition to pretty JSON.
pub fn to_json(definition: &ProcedureDefinition) -> EngineResult<String> {
    Ok(serde_json::to_string_pretty(definition)?)
}
