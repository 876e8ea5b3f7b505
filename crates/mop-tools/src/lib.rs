//! Step handler library for Methods of Procedure.
//!
//! This crate provides the pieces a procedure interpreter dispatches to:
//! - `registry`: the `StepHandler` trait and the `HandlerRegistry`
//! - `context`: the execution context and per-invocation `StepScope`
//! - `template`: the `{{ ... }}` variable resolver
//! - `transport` / `relay`: collaborator interfaces for devices and messaging
//! - `handlers`: built-in `command`, `delay`, `webhook`, `notify`, `check`
//!   and sandboxed `code` handlers

pub mod context;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod relay;
pub mod result;
pub mod template;
pub mod transport;

pub use context::{ExecutionContext, HistoryEntry, Namespace, StepScope, NO_DEVICE};
pub use error::StepError;
pub use handlers::{create_default_registry, SandboxConfig};
pub use registry::{HandlerInfo, HandlerRegistry, ParamKind, ParamSchema, ParamSpec, StepHandler};
pub use relay::{MessageRelay, Notification, TracingRelay};
pub use result::{StepResult, StepStatus};
pub use template::VariableResolver;
pub use transport::{CommandOutput, DeviceTransport, LocalShellTransport};
