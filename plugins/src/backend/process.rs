use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use geoflow_core::dispatch::{BackendExecutor, TaskReporter};
use geoflow_core::error::ExecError;
use geoflow_core::executor::CommandBuilder;
use geoflow_core::model::{ExecutionStatus, ExecutionTask, ProcessingComponent};
use geoflow_core::runner::{start_command, CommandRunner, CommandSpec, Signal};
use geoflow_core::state::ExecutionStateManager;

use super::{component_of, resource_of, InFlight};
use crate::runner::signal_process_group;

pub const PROCESS_BACKEND: &str = "process";

/// Runs component commands as child processes of this host.
///
/// Handles components without a container whose backend hint is absent or
/// `process`. The resource id is the child's pid.
pub struct LocalProcessExecutor {
    runner: Arc<dyn CommandRunner>,
    commands: Arc<dyn CommandBuilder>,
    reporter: TaskReporter,
    timeout: Option<Duration>,
    working_dir: Option<PathBuf>,
    in_flight: InFlight,
}

impl LocalProcessExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        commands: Arc<dyn CommandBuilder>,
        state: ExecutionStateManager,
    ) -> Self {
        Self {
            runner,
            commands,
            reporter: TaskReporter::new(state, PROCESS_BACKEND),
            timeout: None,
            working_dir: None,
            in_flight: InFlight::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    async fn run(
        &self,
        task: &ExecutionTask,
        spec: &CommandSpec,
    ) -> Result<ExecutionStatus, ExecError> {
        let cancel = self.in_flight.register(&task.id);
        let result = async {
            let running = start_command(self.runner.as_ref(), spec).await?;
            let pid = running.resource_id().unwrap_or_else(|| task.id.clone());
            self.reporter
                .accepted(task, &pid, Some("localhost"), ExecutionStatus::Running)
                .await?;
            let mut progress = self.reporter.progress(task);
            running.finish(&mut progress, cancel).await
        }
        .await;
        self.in_flight.finish(&task.id);

        let outcome = result?;
        if outcome.cancelled {
            return self
                .reporter
                .mark(&task.id, ExecutionStatus::Cancelled, Some("stopped".to_string()))
                .await;
        }
        self.reporter.finished(&task.id, outcome.exit_code).await
    }
}

#[async_trait]
impl BackendExecutor for LocalProcessExecutor {
    fn name(&self) -> &str {
        PROCESS_BACKEND
    }

    async fn initialize(&self) -> Result<(), ExecError> {
        Ok(())
    }

    async fn close(&self) {
        self.in_flight.cancel_all();
    }

    fn supports(&self, component: &ProcessingComponent) -> bool {
        component.container.is_none()
            && (component.backend.is_none() || component.wants_backend(PROCESS_BACKEND))
    }

    async fn execute(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        let component = component_of(task)?;
        let args = self.commands.build(task).await?;
        let mut spec = CommandSpec::local(args).with_timeout(self.timeout);
        if let Some(dir) = &self.working_dir {
            spec = spec.with_working_dir(dir.clone());
        }
        tracing::debug!(task_id = %task.id, component = %component.id, "running local process");
        self.run(task, &spec).await
    }

    async fn stop(&self, task: &ExecutionTask) -> Result<(), ExecError> {
        if self.in_flight.cancel(&task.id) {
            return Ok(());
        }
        // Not ours any more (e.g. restarted); fall back to the recorded pid.
        match task.resource_id.as_deref() {
            Some(pid) => signal_process_group(pid, Signal::Kill).await,
            None => Ok(()),
        }
    }

    async fn suspend(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        signal_process_group(resource_of(PROCESS_BACKEND, task)?, Signal::Suspend).await?;
        Ok(ExecutionStatus::Suspended)
    }

    async fn resume(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        signal_process_group(resource_of(PROCESS_BACKEND, task)?, Signal::Resume).await?;
        Ok(ExecutionStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use geoflow_core::executor::TemplateCommandBuilder;
    use geoflow_core::model::{ContainerRef, JobSpec, TaskSpec};
    use geoflow_core::persistence::InMemoryPersistence;

    use super::*;
    use crate::runner::LocalProcessRunner;

    async fn setup(template: &str) -> (LocalProcessExecutor, ExecutionStateManager, ExecutionTask) {
        let state = ExecutionStateManager::new(Arc::new(InMemoryPersistence::new()));
        let job = state
            .register_job(JobSpec::new(
                "alice",
                vec![TaskSpec::component(ProcessingComponent::new("c", template))],
            ))
            .await
            .unwrap();
        state.mark_job_queued(&job.id).await.unwrap();
        let task = state.job_tasks(&job.id).await.remove(0);
        let exec = LocalProcessExecutor::new(
            Arc::new(LocalProcessRunner::new()),
            Arc::new(TemplateCommandBuilder),
            state.clone(),
        );
        (exec, state, task)
    }

    #[test]
    fn supports_plain_components_only() {
        let state = ExecutionStateManager::new(Arc::new(InMemoryPersistence::new()));
        let exec = LocalProcessExecutor::new(
            Arc::new(LocalProcessRunner::new()),
            Arc::new(TemplateCommandBuilder),
            state,
        );
        assert!(exec.supports(&ProcessingComponent::new("a", "true")));
        assert!(exec.supports(&ProcessingComponent::new("a", "true").with_backend("process")));
        assert!(!exec.supports(&ProcessingComponent::new("a", "true").with_backend("grid")));
        let boxed = ProcessingComponent::new("a", "true").with_container(ContainerRef {
            image: "gdal".into(),
            registry: None,
            volumes: Default::default(),
            env: Default::default(),
        });
        assert!(!exec.supports(&boxed));
    }

    #[tokio::test]
    async fn successful_command_is_done_with_pid_recorded() {
        let (exec, state, task) = setup("echo 50%").await;
        let status = exec.execute(&task).await.unwrap();
        assert_eq!(status, ExecutionStatus::Done);
        let stored = state.task(&task.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Done);
        assert_eq!(stored.backend.as_deref(), Some("process"));
        assert!(stored.resource_id.unwrap().parse::<u32>().is_ok());
    }

    #[tokio::test]
    async fn non_zero_exit_fails_with_reason() {
        let (exec, state, task) = setup("exit 4").await;
        assert_eq!(exec.execute(&task).await.unwrap(), ExecutionStatus::Failed);
        let stored = state.task(&task.id).await.unwrap();
        assert_eq!(stored.failure_reason.as_deref(), Some("exit code 4"));
    }

    #[tokio::test]
    async fn stop_cancels_a_running_task() {
        let (exec, state, task) = setup("sleep 30").await;
        let exec = Arc::new(exec);
        let running = {
            let exec = exec.clone();
            let task = task.clone();
            tokio::spawn(async move { exec.execute(&task).await })
        };
        for _ in 0..50 {
            if state.task(&task.id).await.unwrap().status == ExecutionStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        exec.stop(&task).await.unwrap();
        let status = running.await.unwrap().unwrap();
        assert_eq!(status, ExecutionStatus::Cancelled);
    }
}
