use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ExecError;
use crate::model::{ExecutionStatus, ExecutionTask};
use crate::runner::LineConsumer;
use crate::state::{ExecutionStateManager, TransitionError};

lazy_static! {
    static ref PERCENT: Regex = Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").expect("valid regex");
}

/// Maps a process exit code to the task status it implies.
pub fn exit_status(exit_code: i32) -> (ExecutionStatus, Option<String>) {
    if exit_code == 0 {
        (ExecutionStatus::Done, None)
    } else {
        (ExecutionStatus::Failed, Some(format!("exit code {exit_code}")))
    }
}

/// The path every backend takes to publish task state.
#[derive(Clone)]
pub struct TaskReporter {
    state: ExecutionStateManager,
    backend: String,
}

impl TaskReporter {
    pub fn new(state: ExecutionStateManager, backend: impl Into<String>) -> Self {
        Self {
            state,
            backend: backend.into(),
        }
    }

    pub fn state(&self) -> &ExecutionStateManager {
        &self.state
    }

    /// Records the resource handle and moves the task to `status`
    /// (`RUNNING`, or `QUEUED_ACTIVE` for backends that queue remotely).
    pub async fn accepted(
        &self,
        task: &ExecutionTask,
        resource_id: &str,
        host: Option<&str>,
        status: ExecutionStatus,
    ) -> Result<(), ExecError> {
        self.state
            .assign_resource(&task.id, &self.backend, resource_id, host)
            .await?;
        self.mark(&task.id, status, None).await?;
        tracing::info!(
            task_id = %task.id,
            backend = %self.backend,
            resource_id,
            status = %status,
            "task accepted"
        );
        Ok(())
    }

    /// Applies a status reported by the backend.
    ///
    /// A task that already reached a terminal status (e.g. cancelled while
    /// the remote side was still finishing) keeps it; the late report is
    /// dropped and the current status returned.
    pub async fn mark(
        &self,
        task_id: &str,
        status: ExecutionStatus,
        reason: Option<String>,
    ) -> Result<ExecutionStatus, ExecError> {
        match self.state.transition(task_id, status, reason).await {
            Ok(_) => Ok(status),
            Err(ExecError::Transition(TransitionError::FromTerminalState { state })) => {
                tracing::debug!(
                    task_id,
                    backend = %self.backend,
                    current = %state,
                    reported = %status,
                    "late status report ignored"
                );
                Ok(state)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn finished(
        &self,
        task_id: &str,
        exit_code: i32,
    ) -> Result<ExecutionStatus, ExecError> {
        let (status, reason) = exit_status(exit_code);
        if status == ExecutionStatus::Done {
            // DONE is only reachable from RUNNING; short jobs may finish
            // before the backend ever observed them running.
            if let Some(task) = self.state.task(task_id).await {
                if matches!(
                    task.status,
                    ExecutionStatus::Undetermined
                        | ExecutionStatus::QueuedActive
                        | ExecutionStatus::Suspended
                ) {
                    self.mark(task_id, ExecutionStatus::Running, None).await?;
                }
            }
        }
        let applied = self.mark(task_id, status, reason).await?;
        tracing::info!(
            task_id,
            backend = %self.backend,
            exit_code,
            status = %applied,
            "task finished"
        );
        Ok(applied)
    }

    /// A line consumer that turns `NN%` markers in the output into progress
    /// events for `task`.
    pub fn progress(&self, task: &ExecutionTask) -> ProgressConsumer {
        ProgressConsumer {
            state: self.state.clone(),
            job_id: task.job_id.clone(),
            task_id: task.id.clone(),
            last: -1.0,
        }
    }
}

pub struct ProgressConsumer {
    state: ExecutionStateManager,
    job_id: String,
    task_id: String,
    last: f32,
}

impl LineConsumer for ProgressConsumer {
    fn consume(&mut self, line: &str) {
        tracing::debug!(target: "geoflow.output", task_id = %self.task_id, "{line}");
        let Some(caps) = PERCENT.captures(line) else {
            return;
        };
        let Ok(percent) = caps[1].parse::<f32>() else {
            return;
        };
        if percent <= 100.0 && percent > self.last {
            self.last = percent;
            self.state.publish_progress(&self.job_id, &self.task_id, percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{JobSpec, ProcessingComponent, TaskSpec};
    use crate::persistence::InMemoryPersistence;
    use crate::state::ExecutionEvent;

    async fn one_task() -> (ExecutionStateManager, ExecutionTask) {
        let state = ExecutionStateManager::new(Arc::new(InMemoryPersistence::new()));
        let spec = JobSpec {
            id: Some("job-1".into()),
            user: "ana".into(),
            name: "ndvi".into(),
            workflow_id: None,
            batch_id: None,
            tasks: vec![TaskSpec::Component {
                id: Some("t1".into()),
                workflow_node_id: None,
                component: ProcessingComponent::new("gdal", "gdalinfo $input"),
                inputs: Default::default(),
            }],
        };
        state.register_job(spec).await.unwrap();
        state.mark_job_queued("job-1").await.unwrap();
        let task = state.task("t1").await.unwrap();
        (state, task)
    }

    #[test]
    fn exit_codes_map_to_status() {
        assert_eq!(exit_status(0), (ExecutionStatus::Done, None));
        assert_eq!(
            exit_status(3),
            (ExecutionStatus::Failed, Some("exit code 3".to_string()))
        );
    }

    #[tokio::test]
    async fn late_report_keeps_terminal_status() {
        let (state, task) = one_task().await;
        let reporter = TaskReporter::new(state.clone(), "process");
        reporter
            .accepted(&task, "4242", None, ExecutionStatus::Running)
            .await
            .unwrap();
        state.cancel_job("job-1").await.unwrap();

        let applied = reporter.finished("t1", 0).await.unwrap();
        assert_eq!(applied, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn progress_only_moves_forward() {
        let (state, task) = one_task().await;
        let mut rx = state.subscribe();
        let mut consumer = TaskReporter::new(state.clone(), "process").progress(&task);

        consumer.consume("reading tiles 10%");
        consumer.consume("5% again");
        consumer.consume("done 100 %");

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::TaskProgress { percent, .. } = event {
                seen.push(percent);
            }
        }
        assert_eq!(seen, vec![10.0, 100.0]);
    }
}
