//! Backend executors: where component tasks actually run.

pub mod container;
pub mod grid;
pub mod process;
pub mod ssh;

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use geoflow_core::error::ExecError;
use geoflow_core::model::{ExecutionTask, ProcessingComponent};

pub use container::ContainerExecutor;
pub use grid::{
    CliGridSession, GridControl, GridEngineExecutor, GridJobState, GridJobTemplate, GridSession,
};
pub use process::LocalProcessExecutor;
pub use ssh::SshExecutor;

/// Stop tokens of the tasks a backend is currently running.
#[derive(Default)]
pub(crate) struct InFlight {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl InFlight {
    pub(crate) fn register(&self, task_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(task_id.to_string(), token.clone());
        token
    }

    pub(crate) fn finish(&self, task_id: &str) {
        self.lock().remove(task_id);
    }

    /// Trips the stop token; `false` when the task is not running here.
    pub(crate) fn cancel(&self, task_id: &str) -> bool {
        match self.lock().get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&self) {
        for token in self.lock().values() {
            token.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub(crate) fn component_of(task: &ExecutionTask) -> Result<&ProcessingComponent, ExecError> {
    task.processing_component().ok_or_else(|| {
        ExecError::Execution(format!("task {} has no processing component", task.id))
    })
}

pub(crate) fn resource_of<'a>(
    backend: &str,
    task: &'a ExecutionTask,
) -> Result<&'a str, ExecError> {
    task.resource_id.as_deref().ok_or_else(|| {
        ExecError::Execution(format!("task {} has no {backend} resource id", task.id))
    })
}
