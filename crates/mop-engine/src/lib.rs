//! Procedure graph and interpreter for Methods of Procedure.
//!
//! A procedure is a graph of typed steps joined by `on_success` /
//! `on_failure` edges, run against a list of target devices. This crate
//! parses and validates procedure documents and executes them using the
//! handlers from `mop-tools`.
//!
//! ```ignore
//! let graph = mop_engine::procedure::parse_procedure(&yaml)?;
//! let interpreter = Interpreter::new(Arc::new(registry));
//! let execution = interpreter.run(&graph, ValueMap::new()).await;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod procedure;

pub use config::EngineConfig;
pub use engine::{
    Execution, ExecutionRecorder, ExecutionService, ExecutionStatus, Interpreter, MemoryRecorder,
    NullRecorder, RecordedEvent, StepRecord, TracingRecorder,
};
pub use error::{EngineError, EngineResult};
pub use procedure::{
    ProcedureDefinition, ProcedureGraph, StepDefinition, ValidationError, ValueMap, Violation,
};
