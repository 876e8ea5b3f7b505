//! Procedure definitions, parsing and validation.

pub mod graph;
pub mod parser;
pub mod types;
pub mod validate;

pub use graph::ProcedureGraph;
pub use parser::{load_procedure, parse_definition, parse_procedure, to_json, to_yaml};
pub use types::{ProcedureDefinition, StepDefinition, ValueMap};
pub use validate::{validate, ValidationError, Violation};
