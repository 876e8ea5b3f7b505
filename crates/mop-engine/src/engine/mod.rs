//! Execution engine: interpreter, execution records, recorders and service.

pub mod execution;
pub mod interpreter;
pub mod recorder;
pub mod service;

pub use execution::{Execution, ExecutionStatus, StepRecord};
pub use interpreter::Interpreter;
pub use recorder::{ExecutionRecorder, MemoryRecorder, NullRecorder, RecordedEvent, TracingRecorder};
pub use service::ExecutionService;
