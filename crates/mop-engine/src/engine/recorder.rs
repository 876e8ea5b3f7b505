//! Execution lifecycle callbacks.
//!
//! Persistence lives outside the engine. The interpreter reports progress to
//! an [`ExecutionRecorder`]; the store collaborator implements it.

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use mop_tools::StepResult;

use super::execution::ExecutionStatus;

/// Receives lifecycle callbacks from the interpreter.
///
/// Step callbacks for different devices of the same step may arrive
/// concurrently and in any order.
#[async_trait]
pub trait ExecutionRecorder: Send + Sync {
    async fn on_execution_start(&self, _execution_id: Uuid, _procedure: &str) {}

    async fn on_step_start(&self, _execution_id: Uuid, _step_id: &str, _device: Option<&str>) {}

    async fn on_step_complete(
        &self,
        _execution_id: Uuid,
        _step_id: &str,
        _device: Option<&str>,
        _result: &StepResult,
    ) {
    }

    async fn on_execution_complete(&self, _execution_id: Uuid, _status: ExecutionStatus) {}
}

/// Discards every callback.
#[derive(Debug, Default)]
pub struct NullRecorder;

impl ExecutionRecorder for NullRecorder {}

/// Logs every callback.
#[derive(Debug, Default)]
pub struct TracingRecorder;

#[async_trait]
impl ExecutionRecorder for TracingRecorder {
    async fn on_execution_start(&self, execution_id: Uuid, procedure: &str) {
        tracing::info!(execution_id = %execution_id, procedure = %procedure, "Execution started");
    }

    async fn on_step_start(&self, execution_id: Uuid, step_id: &str, device: Option<&str>) {
        tracing::debug!(
            execution_id = %execution_id,
            step = %step_id,
            device = device.unwrap_or("-"),
            "Step started"
        );
    }

    async fn on_step_complete(
        &self,
        execution_id: Uuid,
        step_id: &str,
        device: Option<&str>,
        result: &StepResult,
    ) {
        tracing::info!(
            execution_id = %execution_id,
            step = %step_id,
            device = device.unwrap_or("-"),
            status = %result.status,
            duration_ms = result.duration_ms,
            "{}",
            result.message
        );
    }

    async fn on_execution_complete(&self, execution_id: Uuid, status: ExecutionStatus) {
        tracing::info!(execution_id = %execution_id, status = %status, "Execution completed");
    }
}

/// A callback captured by [`MemoryRecorder`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    ExecutionStart {
        execution_id: Uuid,
        procedure: String,
    },
    StepStart {
        execution_id: Uuid,
        step_id: String,
        device: Option<String>,
    },
    StepComplete {
        execution_id: Uuid,
        step_id: String,
        device: Option<String>,
        result: StepResult,
    },
    ExecutionComplete {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Keeps every callback in arrival order.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the captured callbacks.
    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().await.clone()
    }

    async fn push(&self, event: RecordedEvent) {
        self.events.lock().await.push(event);
    }
}

#[async_trait]
impl ExecutionRecorder for MemoryRecorder {
    async fn on_execution_start(&self, execution_id: Uuid, procedure: &str) {
        self.push(RecordedEvent::ExecutionStart {
            execution_id,
            procedure: procedure.to_string(),
        })
        .await;
    }

    async fn on_step_start(&self, execution_id: Uuid, step_id: &str, device: Option<&str>) {
        self.push(RecordedEvent::StepStart {
            execution_id,
            step_id: step_id.to_string(),
            device: device.map(str::to_string),
        })
        .await;
    }

    async fn on_step_complete(
        &self,
        execution_id: Uuid,
        step_id: &str,
        device: Option<&str>,
        result: &StepResult,
    ) {
        self.push(RecordedEvent::StepComplete {
            execution_id,
            step_id: step_id.to_string(),
            device: device.map(str::to_string),
            result: result.clone(),
        })
        .await;
    }

    async fn on_execution_complete(&self, execution_id: Uuid, status: ExecutionStatus) {
        self.push(RecordedEvent::ExecutionComplete {
            execution_id,
            status,
        })
        .await;
    }
}
