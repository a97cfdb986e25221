use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::model::{ExecutionStatus, ExecutionTask, ProcessingComponent};

/// A pluggable execution backend (grid engine, SSH host, local process,
/// container).
///
/// Backends are selected by capability: the dispatcher asks every registered
/// backend whether it `supports` a component and routes the task to the one
/// that does. `execute` submits the work, records the backend resource id and
/// moves the task at least to `RUNNING`; blocking backends return only once
/// the task reached its terminal status.
#[async_trait]
pub trait BackendExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Acquires sessions or other resources. Fails when the backend is
    /// unreachable. A second call is a no-op.
    async fn initialize(&self) -> Result<(), ExecError>;

    /// Releases resources, best-effort.
    async fn close(&self);

    fn supports(&self, component: &ProcessingComponent) -> bool;

    async fn execute(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError>;

    /// Best-effort cancel of a running task.
    async fn stop(&self, task: &ExecutionTask) -> Result<(), ExecError>;

    async fn suspend(&self, _task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        Err(ExecError::unsupported(self.name(), "suspend"))
    }

    async fn resume(&self, _task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        Err(ExecError::unsupported(self.name(), "resume"))
    }

    /// Period of the reconciliation loop, `None` when the backend has none.
    fn monitor_interval(&self) -> Option<Duration> {
        None
    }

    /// One reconciliation pass of remote state against local task state.
    async fn monitor(&self) -> Result<(), ExecError> {
        Ok(())
    }
}
