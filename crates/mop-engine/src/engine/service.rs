//! Invocation surface for queue workers and embedders.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::execution::{Execution, ExecutionStatus};
use super::interpreter::Interpreter;
use crate::error::{EngineError, EngineResult};
use crate::procedure::{ProcedureDefinition, ProcedureGraph, ValueMap};

#[derive(Debug, Clone)]
struct Progress {
    status: ExecutionStatus,
    execution: Option<Arc<Execution>>,
}

struct RunHandle {
    cancel: CancellationToken,
    progress: watch::Receiver<Progress>,
}

/// Starts, tracks and cancels executions.
#[derive(Clone)]
pub struct ExecutionService {
    interpreter: Arc<Interpreter>,
    runs: Arc<RwLock<HashMap<Uuid, RunHandle>>>,
}

impl ExecutionService {
    pub fn new(interpreter: Interpreter) -> Self {
        Self {
            interpreter: Arc::new(interpreter),
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Start a run in the background and return its id immediately.
    ///
    /// Handler checks run first; a graph that references unknown step types
    /// or omits required params is rejected here and never starts.
    pub async fn submit(&self, graph: ProcedureGraph, overrides: ValueMap) -> EngineResult<Uuid> {
        graph.check_handlers(self.interpreter.registry())?;

        let execution_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(Progress {
            status: ExecutionStatus::Pending,
            execution: None,
        });

        self.runs.write().await.insert(
            execution_id,
            RunHandle {
                cancel: cancel.clone(),
                progress: rx,
            },
        );

        let interpreter = self.interpreter.clone();
        tokio::spawn(async move {
            tx.send_replace(Progress {
                status: ExecutionStatus::Running,
                execution: None,
            });
            let execution = interpreter
                .execute(execution_id, &graph, overrides, cancel)
                .await;
            tx.send_replace(Progress {
                status: execution.status,
                execution: Some(Arc::new(execution)),
            });
        });

        tracing::info!(execution_id = %execution_id, "Execution submitted");
        Ok(execution_id)
    }

    /// Run to completion on the caller's task.
    pub async fn run(&self, graph: &ProcedureGraph, overrides: ValueMap) -> EngineResult<Execution> {
        graph.check_handlers(self.interpreter.registry())?;
        Ok(self.interpreter.run(graph, overrides).await)
    }

    /// Validate a raw definition, then run it to completion.
    pub async fn run_definition(
        &self,
        definition: ProcedureDefinition,
        overrides: ValueMap,
    ) -> EngineResult<Execution> {
        let graph = ProcedureGraph::new(definition)?;
        self.run(&graph, overrides).await
    }

    /// Request cancellation. Takes effect at the next step boundary.
    pub async fn cancel(&self, execution_id: Uuid) -> EngineResult<()> {
        let runs = self.runs.read().await;
        let handle = runs
            .get(&execution_id)
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))?;
        handle.cancel.cancel();
        tracing::info!(execution_id = %execution_id, "Cancellation requested");
        Ok(())
    }

    /// Current status of a submitted run.
    pub async fn status(&self, execution_id: Uuid) -> EngineResult<ExecutionStatus> {
        let runs = self.runs.read().await;
        let handle = runs
            .get(&execution_id)
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))?;
        let status = handle.progress.borrow().status;
        Ok(status)
    }

    /// Wait for a submitted run to finish.
    pub async fn wait(&self, execution_id: Uuid) -> EngineResult<Execution> {
        let mut progress = {
            let runs = self.runs.read().await;
            runs.get(&execution_id)
                .map(|h| h.progress.clone())
                .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))?
        };

        let done = progress
            .wait_for(|p| p.execution.is_some())
            .await
            .map_err(|_| EngineError::TaskFailed(execution_id.to_string()))?;

        done.execution
            .as_deref()
            .cloned()
            .ok_or_else(|| EngineError::TaskFailed(execution_id.to_string()))
    }

    /// Drop a finished run from the tracking table.
    pub async fn forget(&self, execution_id: Uuid) -> EngineResult<()> {
        let mut runs = self.runs.write().await;
        let finished = runs
            .get(&execution_id)
            .map(|h| h.progress.borrow().status.is_terminal())
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))?;
        if finished {
            runs.remove(&execution_id);
        }
        Ok(())
    }
}
