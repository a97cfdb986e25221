#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use geoflow_core::dispatch::{BackendExecutor, Dispatcher, ExecutorRegistry, TaskReporter};
use geoflow_core::error::{ExecError, TopologyError};
use geoflow_core::executor::{
    ConcurrencyContext, ConcurrencyStrategyPlugin, Orchestrator, OrchestratorOptions,
    RetryStrategyPlugin,
};
use geoflow_core::model::{
    ExecutionJob, ExecutionStatus, ExecutionTask, NodeDescription, NodeServiceStatus,
    ProcessingComponent, ServiceStatus, ToolInstallStatus,
};
use geoflow_core::persistence::{InMemoryPersistence, Persistence};
use geoflow_core::queue::JobQueue;
use geoflow_core::runner::{CommandRunner, CommandSpec, RunnerSession, Signal};
use geoflow_core::state::ExecutionStateManager;
use geoflow_core::topology::Installer;
use tokio::io::{AsyncRead, AsyncWrite};

/// What the fake backend does on one dispatch of a component.
#[derive(Debug, Clone)]
pub enum Step {
    Exit(i32),
    Unreachable,
}

/// Backend that plays back a per-component script; once a script runs out
/// every further dispatch exits 0.
pub struct ScriptedBackend {
    name: String,
    reporter: TaskReporter,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    pub dispatched: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(state: ExecutionStateManager) -> Self {
        Self {
            name: "scripted".to_string(),
            reporter: TaskReporter::new(state, "scripted"),
            scripts: Mutex::new(HashMap::new()),
            dispatched: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, component: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(component.to_string(), steps.into());
        self
    }

    pub fn dispatch_count(&self, component: &str) -> usize {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == component)
            .count()
    }
}

#[async_trait]
impl BackendExecutor for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), ExecError> {
        Ok(())
    }

    async fn close(&self) {}

    fn supports(&self, component: &ProcessingComponent) -> bool {
        component.container.is_none()
    }

    async fn execute(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        let component = task
            .processing_component()
            .map(|c| c.id.clone())
            .unwrap_or_default();
        self.dispatched.lock().unwrap().push(component.clone());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&component)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Exit(0));
        match step {
            Step::Unreachable => Err(ExecError::connection("worker-1", "Connection refused")),
            Step::Exit(code) => {
                let resource_id = format!("pid-{}", task.id);
                self.reporter
                    .accepted(task, &resource_id, Some("worker-1"), ExecutionStatus::Running)
                    .await?;
                self.reporter.finished(&task.id, code).await
            }
        }
    }

    async fn stop(&self, task: &ExecutionTask) -> Result<(), ExecError> {
        self.stopped.lock().unwrap().push(task.id.clone());
        Ok(())
    }
}

pub struct QuickRetry {
    pub attempts: u32,
}

impl RetryStrategyPlugin for QuickRetry {
    fn name(&self) -> &str {
        "quick"
    }

    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.attempts).then_some(Duration::from_millis(1))
    }

    fn max_attempts(&self) -> u32 {
        self.attempts
    }
}

pub struct BaseConcurrency;

impl ConcurrencyStrategyPlugin for BaseConcurrency {
    fn name(&self) -> &str {
        "base"
    }

    fn calculate_concurrency(&self, context: &ConcurrencyContext) -> usize {
        context.base_concurrency
    }
}

pub fn new_state() -> ExecutionStateManager {
    ExecutionStateManager::new(Arc::new(InMemoryPersistence::new()))
}

pub fn orchestrator(
    state: &ExecutionStateManager,
    backend: Arc<ScriptedBackend>,
    retries: u32,
) -> Orchestrator {
    let mut registry = ExecutorRegistry::new();
    registry.register(backend);
    Orchestrator::new(
        state.clone(),
        Arc::new(JobQueue::new()),
        Arc::new(Dispatcher::new(registry)),
        Arc::new(QuickRetry { attempts: retries }),
        Arc::new(BaseConcurrency),
        OrchestratorOptions {
            max_concurrency: 4,
            idle_poll: Duration::from_millis(10),
        },
    )
}

pub fn component(id: &str) -> ProcessingComponent {
    ProcessingComponent::new(id, format!("echo {id}"))
}

/// Runner that answers by the first matching substring of the command line.
#[derive(Default)]
pub struct CannedRunner {
    replies: Vec<(String, i32, String)>,
    unreachable: Vec<String>,
    pub commands: Mutex<Vec<String>>,
}

impl CannedRunner {
    pub fn reply(mut self, needle: &str, code: i32, output: &str) -> Self {
        self.replies.push((needle.to_string(), code, output.to_string()));
        self
    }

    pub fn unreachable_host(mut self, host: &str) -> Self {
        self.unreachable.push(host.to_string());
        self
    }
}

struct CannedSession {
    output: Option<Vec<u8>>,
    code: i32,
}

#[async_trait]
impl RunnerSession for CannedSession {
    fn stdin(&mut self) -> Option<Box<dyn AsyncWrite + Unpin + Send>> {
        None
    }

    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.output
            .take()
            .map(|o| Box::new(Cursor::new(o)) as Box<dyn AsyncRead + Unpin + Send>)
    }

    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        None
    }

    async fn signal(&mut self, _signal: Signal) -> Result<(), ExecError> {
        Ok(())
    }

    async fn wait(&mut self) -> Result<i32, ExecError> {
        Ok(self.code)
    }

    async fn disconnect(&mut self) {}
}

#[async_trait]
impl CommandRunner for CannedRunner {
    fn name(&self) -> &str {
        "canned"
    }

    async fn start_session(&self, spec: &CommandSpec) -> Result<Box<dyn RunnerSession>, ExecError> {
        if self.unreachable.contains(&spec.host) {
            return Err(ExecError::connection(&spec.host, "No route to host"));
        }
        let line = spec.command_line();
        self.commands.lock().unwrap().push(line.clone());
        let (code, output) = self
            .replies
            .iter()
            .find(|(needle, _, _)| line.contains(needle.as_str()))
            .map(|(_, code, out)| (*code, out.clone()))
            .unwrap_or((0, String::new()));
        Ok(Box::new(CannedSession {
            output: Some(output.into_bytes()),
            code,
        }))
    }

    async fn can_connect(&self, host: &str, _user: &str, _password: Option<&str>) -> bool {
        !self.unreachable.iter().any(|h| h == host)
    }
}

/// Installer that marks a tool installed and remembers what it saw.
pub struct RecordingInstaller {
    pub tool: String,
    pub fail_on: Option<String>,
    pub master: tokio::sync::Mutex<Option<String>>,
    pub installed: Mutex<Vec<String>>,
    pub uninstalled: Mutex<Vec<String>>,
}

impl RecordingInstaller {
    pub fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            fail_on: None,
            master: tokio::sync::Mutex::new(None),
            installed: Mutex::new(Vec::new()),
            uninstalled: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, hostname: &str) -> Self {
        self.fail_on = Some(hostname.to_string());
        self
    }
}

#[async_trait]
impl Installer for RecordingInstaller {
    fn name(&self) -> &str {
        &self.tool
    }

    async fn set_master_node_info(&self, master: &NodeDescription) {
        *self.master.lock().await = Some(master.hostname.clone());
    }

    async fn install_new_node(
        &self,
        node: &mut NodeDescription,
    ) -> Result<Vec<ToolInstallStatus>, TopologyError> {
        if self.fail_on.as_deref() == Some(node.hostname.as_str()) {
            return Err(TopologyError::new(
                geoflow_core::error::TopologyOp::Install,
                &node.hostname,
                "installer script failed",
            )
            .with_exit_code(2)
            .with_tool(&self.tool));
        }
        self.installed.lock().unwrap().push(node.hostname.clone());
        node.set_service_status(NodeServiceStatus {
            service: self.tool.clone(),
            version: Some("1.0".to_string()),
            status: ServiceStatus::Installed,
        });
        Ok(vec![ToolInstallStatus::ok(&self.tool, ServiceStatus::Installed)])
    }

    async fn uninstall_node(
        &self,
        node: &mut NodeDescription,
    ) -> Result<Vec<ToolInstallStatus>, TopologyError> {
        self.uninstalled.lock().unwrap().push(node.hostname.clone());
        Ok(vec![ToolInstallStatus::ok(&self.tool, ServiceStatus::Uninstalled)])
    }
}

/// In-memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryPersistence,
    pub fail_job_saves: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl FlakyStore {
    fn refuse(flag: &AtomicBool, what: &str) -> Result<(), ExecError> {
        if flag.load(Ordering::SeqCst) {
            return Err(ExecError::Persistence(format!("{what}: disk full")));
        }
        Ok(())
    }
}

#[async_trait]
impl Persistence for FlakyStore {
    async fn save_job(&self, job: &ExecutionJob) -> Result<(), ExecError> {
        Self::refuse(&self.fail_job_saves, "save_job")?;
        self.inner.save_job(job).await
    }

    async fn save_task(&self, task: &ExecutionTask) -> Result<(), ExecError> {
        self.inner.save_task(task).await
    }

    async fn update_status(
        &self,
        task_id: &str,
        status: ExecutionStatus,
        reason: Option<&str>,
    ) -> Result<(), ExecError> {
        self.inner.update_status(task_id, status, reason).await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<ExecutionJob>, ExecError> {
        self.inner.get_job(job_id).await
    }

    async fn get_tasks(&self, job_id: &str) -> Result<Vec<ExecutionTask>, ExecError> {
        self.inner.get_tasks(job_id).await
    }

    async fn list_jobs(
        &self,
        statuses: &[ExecutionStatus],
    ) -> Result<Vec<ExecutionJob>, ExecError> {
        self.inner.list_jobs(statuses).await
    }

    async fn list_running(&self) -> Result<Vec<ExecutionTask>, ExecError> {
        self.inner.list_running().await
    }

    async fn get_by_resource_id(
        &self,
        resource_id: &str,
    ) -> Result<Option<ExecutionTask>, ExecError> {
        self.inner.get_by_resource_id(resource_id).await
    }

    async fn save_node(&self, node: &NodeDescription) -> Result<(), ExecError> {
        self.inner.save_node(node).await
    }

    async fn delete_node(&self, hostname: &str) -> Result<(), ExecError> {
        Self::refuse(&self.fail_deletes, "delete_node")?;
        self.inner.delete_node(hostname).await
    }

    async fn list_nodes(&self) -> Result<Vec<NodeDescription>, ExecError> {
        self.inner.list_nodes().await
    }
}
