//! Procedure interpreter.
//!
//! Walks a validated [`ProcedureGraph`] one step at a time. Each step fans
//! out to its handler once per target device, concurrently, and waits for
//! every invocation before merging results and choosing the next step:
//!
//! 1. Resolve the target devices (step override, procedure list, or one
//!    deviceless invocation).
//! 2. Run the invocations, each with its own [`StepScope`] over a snapshot of
//!    the context taken before the step started.
//! 3. Merge results in device-id order. The step's aggregate status is
//!    `failed` if any invocation reports `failed` or `error`.
//! 4. Follow `on_success` or `on_failure`; with no matching edge the run ends
//!    with the aggregate status of the last step.
//!
//! Handler faults never escape: they become `error` results. Only an unknown
//! transition target or an exhausted revisit budget abort a run.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mop_tools::{
    ExecutionContext, HandlerRegistry, Namespace, StepError, StepResult, StepScope, StepStatus,
    VariableResolver,
};

use super::execution::{Execution, ExecutionStatus, StepRecord};
use super::recorder::{ExecutionRecorder, NullRecorder};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::procedure::{ProcedureGraph, StepDefinition, ValueMap};

/// Outcome of one handler invocation.
struct Invocation {
    device: Option<String>,
    result: StepResult,
    vars: Namespace,
}

/// Executes procedure graphs.
pub struct Interpreter {
    registry: Arc<HandlerRegistry>,
    resolver: Arc<VariableResolver>,
    recorder: Arc<dyn ExecutionRecorder>,
    config: EngineConfig,
}

impl Interpreter {
    /// Create an interpreter with default configuration and no recorder.
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            resolver: Arc::new(VariableResolver::new()),
            recorder: Arc::new(NullRecorder),
            config: EngineConfig::default(),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn ExecutionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a graph to completion with a fresh execution id.
    pub async fn run(&self, graph: &ProcedureGraph, overrides: ValueMap) -> Execution {
        self.execute(Uuid::new_v4(), graph, overrides, CancellationToken::new())
            .await
    }

    /// Run a graph to completion.
    ///
    /// `cancel` is checked before each step; an in-flight step always runs
    /// to completion.
    pub async fn execute(
        &self,
        execution_id: Uuid,
        graph: &ProcedureGraph,
        overrides: ValueMap,
        cancel: CancellationToken,
    ) -> Execution {
        let mut execution = Execution::new(execution_id, graph.name());
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());

        let mut ctx = initial_context(graph, overrides);

        tracing::info!(
            execution_id = %execution_id,
            procedure = %graph.name(),
            steps = graph.step_ids().len(),
            "Starting execution"
        );
        self.recorder
            .on_execution_start(execution_id, graph.name())
            .await;

        let outcome = self
            .walk(execution_id, graph, &mut ctx, &mut execution, &cancel)
            .await;

        let status = match outcome {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(execution_id = %execution_id, error = %e, "Execution aborted");
                execution.error = Some(e.to_string());
                ExecutionStatus::Failed
            }
        };

        execution.status = status;
        execution.completed_at = Some(Utc::now());
        execution.context = ctx;

        tracing::info!(
            execution_id = %execution_id,
            status = %status,
            visited = ?execution.visited,
            "Execution finished"
        );
        self.recorder
            .on_execution_complete(execution_id, status)
            .await;

        execution
    }

    /// The step loop. Returns the final status, or the fatal error.
    async fn walk(
        &self,
        execution_id: Uuid,
        graph: &ProcedureGraph,
        ctx: &mut ExecutionContext,
        execution: &mut Execution,
        cancel: &CancellationToken,
    ) -> Result<ExecutionStatus, EngineError> {
        let budget = self.config.max_step_visits.max(1);
        let mut visits: HashMap<String, u32> = HashMap::new();
        let mut previous: Option<String> = None;
        let mut current = Some(graph.entry().to_string());
        let mut last = StepStatus::Success;

        while let Some(step_id) = current.take() {
            if cancel.is_cancelled() {
                tracing::info!(execution_id = %execution_id, next = %step_id, "Execution cancelled");
                return Ok(ExecutionStatus::Cancelled);
            }

            let step = graph
                .step(&step_id)
                .ok_or_else(|| EngineError::UnknownTransitionTarget {
                    from: previous.clone().unwrap_or_default(),
                    target: step_id.clone(),
                })?;

            let count = visits.entry(step_id.clone()).or_insert(0);
            *count += 1;
            if *count > budget {
                return Err(EngineError::RevisitBudgetExceeded {
                    step: step_id,
                    visits: *count,
                    budget,
                });
            }

            execution.visited.push(step_id.clone());
            last = self
                .run_step(execution_id, graph, &step_id, step, ctx, execution)
                .await;

            current = if last.is_success() {
                step.on_success.clone()
            } else {
                step.on_failure.clone()
            };
            previous = Some(step_id);
        }

        Ok(if last.is_success() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        })
    }

    /// Fan a step out across its devices and merge the results.
    async fn run_step(
        &self,
        execution_id: Uuid,
        graph: &ProcedureGraph,
        step_id: &str,
        step: &StepDefinition,
        ctx: &mut ExecutionContext,
        execution: &mut Execution,
    ) -> StepStatus {
        let started_at = Utc::now();
        let targets: Vec<Option<String>> = match graph.devices_for(step) {
            [] => vec![None],
            devices => devices.iter().cloned().map(Some).collect(),
        };
        let timeout = Duration::from_secs(
            step.timeout_seconds
                .unwrap_or(self.config.step_timeout_secs),
        );
        let params = serde_json::Value::Object(step.params.clone());
        let view = Arc::new(ctx.clone());

        tracing::debug!(
            execution_id = %execution_id,
            step = %step_id,
            step_type = %step.step_type,
            devices = targets.len(),
            "Running step"
        );

        let mut outcomes: Vec<Invocation> = stream::iter(targets)
            .map(|device| {
                self.invoke(
                    execution_id,
                    step_id,
                    &step.step_type,
                    &params,
                    device,
                    view.clone(),
                    timeout,
                )
            })
            .buffer_unordered(self.config.max_parallel_devices.max(1))
            .collect()
            .await;

        // Completion order is arbitrary; merge by device id.
        outcomes.sort_by(|a, b| a.device.cmp(&b.device));

        let aggregate = StepStatus::aggregate(outcomes.iter().map(|o| &o.result.status));

        for outcome in outcomes {
            let Invocation {
                device,
                result,
                vars,
            } = outcome;
            let committed = result.status != StepStatus::Error;

            match &device {
                Some(d) => {
                    let mut namespace = if committed {
                        vars
                    } else {
                        ctx.device(d).cloned().unwrap_or_default()
                    };
                    namespace.insert(step_id.to_string(), result_summary(&result));
                    ctx.set_device_namespace(d.clone(), namespace);
                }
                None if committed => ctx.globals = vars,
                None => {}
            }

            ctx.record_result(step_id, device.as_deref(), result.clone());
            execution.log.push(StepRecord {
                step_id: step_id.to_string(),
                device,
                result,
            });
        }

        ctx.step_status.insert(step_id.to_string(), aggregate);
        ctx.push_history(step_id, started_at, Utc::now());

        tracing::info!(
            execution_id = %execution_id,
            step = %step_id,
            status = %aggregate,
            "Step finished"
        );

        aggregate
    }

    /// Run one handler invocation. Never fails: faults become `error` results.
    #[allow(clippy::too_many_arguments)]
    async fn invoke(
        &self,
        execution_id: Uuid,
        step_id: &str,
        step_type: &str,
        params: &serde_json::Value,
        device: Option<String>,
        view: Arc<ExecutionContext>,
        timeout: Duration,
    ) -> Invocation {
        self.recorder
            .on_step_start(execution_id, step_id, device.as_deref())
            .await;

        let start = Instant::now();
        let mut scope = StepScope::new(execution_id, step_id, device.clone(), view);
        let call = AssertUnwindSafe(self.call(step_type, params, &mut scope, timeout))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(StepError::Panic(panic_message(payload.as_ref()))));
        let result = match call {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    execution_id = %execution_id,
                    step = %step_id,
                    device = device.as_deref().unwrap_or("-"),
                    error = %e,
                    "Handler error"
                );
                StepResult::from(e)
            }
        }
        .with_duration(start.elapsed().as_millis() as u64);

        self.recorder
            .on_step_complete(execution_id, step_id, device.as_deref(), &result)
            .await;

        Invocation {
            device,
            result,
            vars: scope.into_vars(),
        }
    }

    async fn call(
        &self,
        step_type: &str,
        params: &serde_json::Value,
        scope: &mut StepScope,
        timeout: Duration,
    ) -> Result<StepResult, StepError> {
        let handler = self.registry.resolve(step_type)?;
        let resolved = self
            .resolver
            .resolve_params(params, scope, handler.raw_params())?;

        tokio::time::timeout(timeout, handler.execute(&resolved, scope))
            .await
            .map_err(|_| StepError::Timeout(timeout.as_secs()))?
    }
}

/// Seed globals from procedure defaults plus caller overrides, and create an
/// empty namespace for every device any step can target.
fn initial_context(graph: &ProcedureGraph, overrides: ValueMap) -> ExecutionContext {
    let definition = graph.definition();
    let mut globals = definition.variables.clone().unwrap_or_default();
    globals.extend(overrides);

    let mut ctx = ExecutionContext::new(globals);
    let devices = definition
        .devices
        .iter()
        .chain(definition.steps.iter().flat_map(|s| s.devices.iter().flatten()));
    for device in devices {
        if ctx.device(device).is_none() {
            ctx.set_device_namespace(device.clone(), Namespace::new());
        }
    }
    ctx
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Entry stored under the step id in a device namespace.
fn result_summary(result: &StepResult) -> serde_json::Value {
    serde_json::json!({
        "status": result.status,
        "message": result.message,
        "data": result.data,
    })
}
