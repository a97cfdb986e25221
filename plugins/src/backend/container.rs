use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use geoflow_core::config::{ContainerConfig, ContainerHost};
use geoflow_core::container::{self, ContainerAction, ContainerSpec};
use geoflow_core::dispatch::{BackendExecutor, TaskReporter};
use geoflow_core::error::ExecError;
use geoflow_core::executor::CommandBuilder;
use geoflow_core::model::{ExecutionStatus, ExecutionTask, ProcessingComponent};
use geoflow_core::runner::{
    run_command, start_command, CollectingConsumer, CommandRunner, CommandSpec,
};
use geoflow_core::state::ExecutionStateManager;
use geoflow_core::topology::TopologyManager;

use super::{component_of, InFlight};

pub const CONTAINER_BACKEND: &str = "container";

/// Runs containerized components through the container runtime CLI, either
/// on this host or on the master node.
///
/// Containers are named after their task so they can be paused and stopped;
/// the name is the resource id.
pub struct ContainerExecutor {
    local: Arc<dyn CommandRunner>,
    remote: Arc<dyn CommandRunner>,
    commands: Arc<dyn CommandBuilder>,
    topology: Arc<TopologyManager>,
    reporter: TaskReporter,
    cfg: ContainerConfig,
    host: ContainerHost,
    timeout: Option<Duration>,
    in_flight: InFlight,
}

impl ContainerExecutor {
    pub fn new(
        local: Arc<dyn CommandRunner>,
        remote: Arc<dyn CommandRunner>,
        commands: Arc<dyn CommandBuilder>,
        topology: Arc<TopologyManager>,
        state: ExecutionStateManager,
        cfg: ContainerConfig,
    ) -> Self {
        Self {
            local,
            remote,
            commands,
            topology,
            reporter: TaskReporter::new(state, CONTAINER_BACKEND),
            cfg,
            host: ContainerHost::Local,
            timeout: None,
            in_flight: InFlight::default(),
        }
    }

    pub fn on_host(mut self, host: ContainerHost) -> Self {
        self.host = host;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `docker run` invocation for a task.
    pub fn container_spec(
        &self,
        task: &ExecutionTask,
        args: Vec<String>,
    ) -> Result<ContainerSpec, ExecError> {
        let component = component_of(task)?;
        let image = component.container.as_ref().ok_or_else(|| {
            ExecError::Execution(format!("component {} has no container image", component.id))
        })?;
        let mut spec = ContainerSpec::from_ref(image, args)
            .with_runtime(self.cfg.runtime)
            .named(container_name(&task.id))
            .with_run_args(["--rm"])
            .with_run_args(self.cfg.extra_args.iter().cloned());
        if let Some(driver) = &self.cfg.volume_driver {
            spec = spec.with_run_args(["--volume-driver".to_string(), driver.clone()]);
        }
        if spec.registry.is_none() {
            if let Some(registry) = &self.cfg.registry {
                spec = spec.with_registry(registry.clone());
            }
        }
        Ok(spec)
    }

    async fn runner_and_spec(&self, argv: Vec<String>) -> (Arc<dyn CommandRunner>, CommandSpec) {
        match self.host {
            ContainerHost::Local => {
                (self.local.clone(), CommandSpec::local(argv).with_shell_words())
            }
            ContainerHost::Master => {
                let master = self.topology.master_node().await;
                let spec = CommandSpec::new(master.address(), &master.user, argv)
                    .with_password(master.password.clone())
                    .with_shell_words();
                (self.remote.clone(), spec)
            }
        }
    }

    async fn host_name(&self) -> String {
        match self.host {
            ContainerHost::Local => "localhost".to_string(),
            ContainerHost::Master => self.topology.master_node().await.hostname,
        }
    }

    async fn control(
        &self,
        task: &ExecutionTask,
        action: ContainerAction,
    ) -> Result<(), ExecError> {
        let name = task.resource_id.clone().unwrap_or_else(|| container_name(&task.id));
        let argv = container::control(self.cfg.runtime, action, &name)?;
        let (runner, spec) = self.runner_and_spec(argv).await;
        let spec = spec.with_timeout(Some(Duration::from_secs(60)));
        let mut out = CollectingConsumer::default();
        let outcome =
            run_command(runner.as_ref(), &spec, &mut out, CancellationToken::new()).await?;
        if outcome.exit_code != 0 {
            return Err(ExecError::Execution(format!(
                "{action:?} of container {name} exited with {}: {}",
                outcome.exit_code,
                out.lines.join(" ")
            )));
        }
        Ok(())
    }
}

/// Container names allow `[a-zA-Z0-9_.-]`.
pub fn container_name(task_id: &str) -> String {
    let safe: String = task_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "_.-".contains(c) { c } else { '-' })
        .collect();
    format!("geoflow-{safe}")
}

#[async_trait]
impl BackendExecutor for ContainerExecutor {
    fn name(&self) -> &str {
        CONTAINER_BACKEND
    }

    async fn initialize(&self) -> Result<(), ExecError> {
        Ok(())
    }

    async fn close(&self) {
        self.in_flight.cancel_all();
    }

    fn supports(&self, component: &ProcessingComponent) -> bool {
        component.container.is_some()
            && (component.backend.is_none() || component.wants_backend(CONTAINER_BACKEND))
    }

    async fn execute(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        let args = self.commands.build(task).await?;
        let spec = self.container_spec(task, args)?;
        let argv = container::shell_words(&spec)?;
        let name = spec.name.clone().unwrap_or_else(|| container_name(&task.id));
        let (runner, command) = self.runner_and_spec(argv).await;
        let command = command.with_timeout(self.timeout);
        let host = self.host_name().await;

        let cancel = self.in_flight.register(&task.id);
        let result = async {
            let running = start_command(runner.as_ref(), &command).await?;
            self.reporter
                .accepted(task, &name, Some(&host), ExecutionStatus::Running)
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

    async fn stop(&self, task: &ExecutionTask) -> Result<(), ExecError> {
        let stopped = self.control(task, ContainerAction::Stop).await;
        self.in_flight.cancel(&task.id);
        stopped
    }

    async fn suspend(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        self.control(task, ContainerAction::Pause).await?;
        Ok(ExecutionStatus::Suspended)
    }

    async fn resume(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        self.control(task, ContainerAction::Unpause).await?;
        Ok(ExecutionStatus::Running)
    }
}
