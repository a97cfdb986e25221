use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use geoflow_core::config::{GridBackendConfig, GridContainerConfig};
use geoflow_core::dispatch::{BackendExecutor, TaskReporter};
use geoflow_core::error::ExecError;
use geoflow_core::executor::CommandBuilder;
use geoflow_core::model::{ExecutionStatus, ExecutionTask, ProcessingComponent};
use geoflow_core::runner::{run_command, CollectingConsumer, CommandRunner, CommandSpec};
use geoflow_core::state::ExecutionStateManager;

use super::{component_of, resource_of, InFlight};

pub const GRID_BACKEND: &str = "grid";
const GRID_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Remote job state as the scheduler reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridJobState {
    Queued,
    Held,
    Running,
    Suspended,
    Done,
    Failed(String),
    /// Left the queue but accounting has no record yet.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridControl {
    Hold,
    Release,
    Terminate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridJobTemplate {
    pub name: String,
    pub args: Vec<String>,
    pub queue: Option<String>,
}

/// A session with a grid-engine scheduler.
#[async_trait]
pub trait GridSession: Send + Sync {
    /// Fails when the scheduler cannot be reached.
    async fn open(&self) -> Result<(), ExecError>;
    async fn close(&self);
    /// Submits a job and returns the scheduler's job id.
    async fn submit(&self, job: &GridJobTemplate) -> Result<String, ExecError>;
    async fn status(&self, job_id: &str) -> Result<GridJobState, ExecError>;
    async fn control(&self, job_id: &str, action: GridControl) -> Result<(), ExecError>;
}

/// Talks to the scheduler through its command line tools
/// (`qsub`, `qstat`, `qacct`, `qdel`, `qhold`, `qrls`).
pub struct CliGridSession {
    runner: Arc<dyn CommandRunner>,
    cfg: GridBackendConfig,
}

impl CliGridSession {
    pub fn new(runner: Arc<dyn CommandRunner>, cfg: GridBackendConfig) -> Self {
        Self { runner, cfg }
    }

    pub fn submit_args(&self, job: &GridJobTemplate) -> Vec<String> {
        let mut args = vec![
            self.cfg.qsub_bin.clone(),
            "-terse".to_string(),
            "-b".to_string(),
            "y".to_string(),
            "-N".to_string(),
            job.name.clone(),
        ];
        if let Some(queue) = &job.queue {
            args.push("-q".to_string());
            args.push(queue.clone());
        }
        args.extend(job.args.iter().cloned());
        args
    }

    async fn capture(&self, args: Vec<String>) -> Result<(i32, Vec<String>), ExecError> {
        let spec = CommandSpec::local(args).with_timeout(Some(GRID_CALL_TIMEOUT));
        let mut out = CollectingConsumer::default();
        let outcome =
            run_command(self.runner.as_ref(), &spec, &mut out, CancellationToken::new()).await?;
        Ok((outcome.exit_code, out.lines))
    }
}

#[async_trait]
impl GridSession for CliGridSession {
    async fn open(&self) -> Result<(), ExecError> {
        let (code, lines) = self.capture(vec![self.cfg.qstat_bin.clone()]).await?;
        if code != 0 {
            return Err(ExecError::connection(
                "grid",
                format!("{} exited with {code}: {}", self.cfg.qstat_bin, lines.join(" ")),
            ));
        }
        Ok(())
    }

    async fn close(&self) {}

    async fn submit(&self, job: &GridJobTemplate) -> Result<String, ExecError> {
        let (code, lines) = self.capture(self.submit_args(job)).await?;
        if code != 0 {
            return Err(ExecError::Execution(format!(
                "{} exited with {code}: {}",
                self.cfg.qsub_bin,
                lines.join(" ")
            )));
        }
        parse_submit(&lines).ok_or_else(|| {
            ExecError::Execution(format!(
                "no job id in {} output: {}",
                self.cfg.qsub_bin,
                lines.join(" ")
            ))
        })
    }

    async fn status(&self, job_id: &str) -> Result<GridJobState, ExecError> {
        let (code, lines) = self.capture(vec![self.cfg.qstat_bin.clone()]).await?;
        if code != 0 {
            return Err(ExecError::Execution(format!("{} exited with {code}", self.cfg.qstat_bin)));
        }
        if let Some(state) = parse_qstat(&lines, job_id) {
            return Ok(state);
        }
        let (code, lines) = self
            .capture(vec![self.cfg.qacct_bin.clone(), "-j".to_string(), job_id.to_string()])
            .await?;
        if code != 0 {
            // Accounting is written asynchronously after the job ends.
            return Ok(GridJobState::Unknown);
        }
        Ok(parse_qacct(&lines))
    }

    async fn control(&self, job_id: &str, action: GridControl) -> Result<(), ExecError> {
        let bin = match action {
            GridControl::Hold => &self.cfg.qhold_bin,
            GridControl::Release => &self.cfg.qrls_bin,
            GridControl::Terminate => &self.cfg.qdel_bin,
        };
        let (code, lines) = self.capture(vec![bin.clone(), job_id.to_string()]).await?;
        if code != 0 {
            return Err(ExecError::Execution(format!(
                "{bin} {job_id} exited with {code}: {}",
                lines.join(" ")
            )));
        }
        Ok(())
    }
}

/// Job id from `qsub -terse` output; array jobs print `id.first-last:step`.
pub fn parse_submit(lines: &[String]) -> Option<String> {
    let first = lines.iter().map(|l| l.trim()).find(|l| !l.is_empty())?;
    let id = first.split('.').next()?.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        return Some(id.to_string());
    }
    // Without -terse: "Your job 123 ("name") has been submitted".
    first
        .split_whitespace()
        .find(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

/// State of `job_id` in default `qstat` output, `None` when it is not listed.
pub fn parse_qstat(lines: &[String], job_id: &str) -> Option<GridJobState> {
    let row = lines.iter().find_map(|line| {
        let mut cols = line.split_whitespace();
        (cols.next() == Some(job_id)).then(|| cols.collect::<Vec<_>>())
    })?;
    // prior, name, user, state
    let state = row.get(3).copied().unwrap_or_default();
    Some(if state.contains('E') {
        GridJobState::Failed(format!("scheduler error state {state}"))
    } else if state.contains('h') {
        GridJobState::Held
    } else if state.contains(['s', 'S', 'T']) {
        GridJobState::Suspended
    } else if state.contains(['r', 't', 'R']) {
        GridJobState::Running
    } else {
        GridJobState::Queued
    })
}

/// Final state from `qacct -j` output.
pub fn parse_qacct(lines: &[String]) -> GridJobState {
    let field = |name: &str| {
        lines.iter().find_map(|line| {
            let mut parts = line.split_whitespace();
            (parts.next() == Some(name)).then(|| parts.collect::<Vec<_>>().join(" "))
        })
    };
    let failed = field("failed").unwrap_or_else(|| "0".to_string());
    let exit_status = field("exit_status").unwrap_or_else(|| "0".to_string());
    if !failed.starts_with('0') {
        return GridJobState::Failed(format!("scheduler failure {failed}"));
    }
    match exit_status.split_whitespace().next() {
        Some("0") => GridJobState::Done,
        Some(code) => GridJobState::Failed(format!("exit code {code}")),
        None => GridJobState::Done,
    }
}

/// `docker run -i --rm [--volume-driver D] -v <bind> <image> args…`
pub fn container_wrap(cfg: &GridContainerConfig, args: Vec<String>) -> Vec<String> {
    let mut argv: Vec<String> =
        ["docker", "run", "-i", "--rm"].iter().map(|s| s.to_string()).collect();
    if let Some(driver) = &cfg.volume_driver {
        argv.push("--volume-driver".to_string());
        argv.push(driver.clone());
    }
    argv.push("-v".to_string());
    argv.push(cfg.bind.clone());
    argv.push(cfg.image.clone());
    argv.extend(args);
    argv
}

/// Submits component tasks to a grid-engine scheduler.
///
/// `execute` submits and then waits for the task to become terminal; the
/// monitor loop is what reconciles scheduler state into task state. The
/// scheduler job id is the resource id.
pub struct GridEngineExecutor {
    session: Arc<dyn GridSession>,
    commands: Arc<dyn CommandBuilder>,
    reporter: TaskReporter,
    cfg: GridBackendConfig,
    monitor_interval: Duration,
    opened: AtomicBool,
    in_flight: InFlight,
}

impl GridEngineExecutor {
    pub fn new(
        session: Arc<dyn GridSession>,
        commands: Arc<dyn CommandBuilder>,
        state: ExecutionStateManager,
        cfg: GridBackendConfig,
    ) -> Self {
        Self {
            session,
            commands,
            reporter: TaskReporter::new(state, GRID_BACKEND),
            cfg,
            monitor_interval: Duration::from_millis(5000),
            opened: AtomicBool::new(false),
            in_flight: InFlight::default(),
        }
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    fn multi_host(&self) -> bool {
        self.cfg.hosts.len() > 1
    }

    async fn wait_for_completion(
        &self,
        task_id: &str,
        cancel: CancellationToken,
    ) -> Result<ExecutionStatus, ExecError> {
        let poll = Duration::from_millis(self.cfg.start_poll_ms.max(10));
        loop {
            let current = self
                .reporter
                .state()
                .task(task_id)
                .await
                .map(|t| t.status)
                .ok_or_else(|| ExecError::Execution(format!("unknown task {task_id}")))?;
            if current.is_terminal() {
                return Ok(current);
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    return self
                        .reporter
                        .mark(task_id, ExecutionStatus::Cancelled, Some("stopped".to_string()))
                        .await;
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    async fn reconcile(&self, task: &ExecutionTask, job_id: &str) -> Result<(), ExecError> {
        let remote = match self.session.status(job_id).await {
            Ok(remote) => remote,
            Err(e) if e.is_retryable() => {
                tracing::warn!(task_id = %task.id, job_id, error = %e, "grid status unavailable");
                return Ok(());
            }
            Err(e) => {
                self.reporter
                    .mark(&task.id, ExecutionStatus::Failed, Some(e.to_string()))
                    .await?;
                return Ok(());
            }
        };
        tracing::trace!(
            task_id = %task.id,
            job_id,
            remote = ?remote,
            local = %task.status,
            "grid reconcile"
        );
        match remote {
            GridJobState::Running if task.status != ExecutionStatus::Running => {
                self.reporter.mark(&task.id, ExecutionStatus::Running, None).await?;
            }
            GridJobState::Suspended if task.status == ExecutionStatus::Running => {
                self.reporter.mark(&task.id, ExecutionStatus::Suspended, None).await?;
            }
            GridJobState::Done => {
                self.reporter.finished(&task.id, 0).await?;
            }
            GridJobState::Failed(reason) => {
                self.reporter
                    .mark(&task.id, ExecutionStatus::Failed, Some(reason))
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl BackendExecutor for GridEngineExecutor {
    fn name(&self) -> &str {
        GRID_BACKEND
    }

    async fn initialize(&self) -> Result<(), ExecError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.session.open().await {
            self.opened.store(false, Ordering::SeqCst);
            return Err(e);
        }
        tracing::info!(
            hosts = self.cfg.hosts.len(),
            queue = ?self.cfg.queue,
            "grid session opened"
        );
        Ok(())
    }

    async fn close(&self) {
        self.in_flight.cancel_all();
        if self.opened.swap(false, Ordering::SeqCst) {
            self.session.close().await;
        }
    }

    fn supports(&self, component: &ProcessingComponent) -> bool {
        component.wants_backend(GRID_BACKEND)
    }

    async fn execute(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        let component = component_of(task)?;
        let mut args = self.commands.build(task).await?;
        if let Some(container) = &self.cfg.container {
            args = container_wrap(container, args);
        }
        let template = GridJobTemplate {
            name: format!("geoflow-{}", component.id),
            args,
            queue: self.cfg.queue.clone(),
        };
        let job_id = self.session.submit(&template).await?;
        let initial = if self.multi_host() {
            ExecutionStatus::QueuedActive
        } else {
            ExecutionStatus::Running
        };
        self.reporter.accepted(task, &job_id, None, initial).await?;

        let cancel = self.in_flight.register(&task.id);
        let result = self.wait_for_completion(&task.id, cancel).await;
        self.in_flight.finish(&task.id);
        result
    }

    async fn stop(&self, task: &ExecutionTask) -> Result<(), ExecError> {
        let deleted = match task.resource_id.as_deref() {
            Some(job_id) => self.session.control(job_id, GridControl::Terminate).await,
            None => Ok(()),
        };
        self.in_flight.cancel(&task.id);
        deleted
    }

    async fn suspend(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        self.session
            .control(resource_of(GRID_BACKEND, task)?, GridControl::Hold)
            .await?;
        Ok(ExecutionStatus::Suspended)
    }

    async fn resume(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        self.session
            .control(resource_of(GRID_BACKEND, task)?, GridControl::Release)
            .await?;
        Ok(ExecutionStatus::QueuedActive)
    }

    fn monitor_interval(&self) -> Option<Duration> {
        Some(self.monitor_interval)
    }

    async fn monitor(&self) -> Result<(), ExecError> {
        let tasks = self
            .reporter
            .state()
            .tasks_for_backend(
                GRID_BACKEND,
                &[
                    ExecutionStatus::QueuedActive,
                    ExecutionStatus::Running,
                    ExecutionStatus::Suspended,
                ],
            )
            .await;
        for task in tasks {
            let Some(job_id) = task.resource_id.clone() else {
                continue;
            };
            if let Err(e) = self.reconcile(&task, &job_id).await {
                tracing::warn!(task_id = %task.id, job_id, error = %e, "grid reconcile failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use geoflow_core::executor::TemplateCommandBuilder;
    use geoflow_core::model::{JobSpec, TaskSpec};
    use geoflow_core::persistence::InMemoryPersistence;

    use super::*;

    #[derive(Default)]
    struct FakeSession {
        submitted: Mutex<Vec<GridJobTemplate>>,
        states: Mutex<VecDeque<Result<GridJobState, ExecError>>>,
        controls: Mutex<Vec<(String, GridControl)>>,
    }

    impl FakeSession {
        fn script(states: Vec<Result<GridJobState, ExecError>>) -> Arc<Self> {
            Arc::new(Self {
                states: Mutex::new(states.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl GridSession for FakeSession {
        async fn open(&self) -> Result<(), ExecError> {
            Ok(())
        }

        async fn close(&self) {}

        async fn submit(&self, job: &GridJobTemplate) -> Result<String, ExecError> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(job.clone());
            Ok(format!("{}", 100 + submitted.len()))
        }

        async fn status(&self, _job_id: &str) -> Result<GridJobState, ExecError> {
            self.states
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(GridJobState::Running))
        }

        async fn control(&self, job_id: &str, action: GridControl) -> Result<(), ExecError> {
            self.controls.lock().unwrap().push((job_id.to_string(), action));
            Ok(())
        }
    }

    async fn setup(
        session: Arc<FakeSession>,
        cfg: GridBackendConfig,
    ) -> (Arc<GridEngineExecutor>, ExecutionStateManager, ExecutionTask) {
        let state = ExecutionStateManager::new(Arc::new(InMemoryPersistence::new()));
        let component =
            ProcessingComponent::new("ndvi", "gpt ndvi.xml -t out.tif").with_backend("grid");
        let job = state
            .register_job(JobSpec::new("alice", vec![TaskSpec::component(component)]))
            .await
            .unwrap();
        state.mark_job_queued(&job.id).await.unwrap();
        let task = state.job_tasks(&job.id).await.remove(0);
        let commands = Arc::new(TemplateCommandBuilder);
        let exec = GridEngineExecutor::new(session, commands, state.clone(), cfg);
        (Arc::new(exec), state, task)
    }

    async fn wait_for(state: &ExecutionStateManager, task_id: &str, status: ExecutionStatus) {
        for _ in 0..200 {
            if state.task(task_id).await.map(|t| t.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task never reached {status}");
    }

    fn fast() -> GridBackendConfig {
        GridBackendConfig {
            start_poll_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn monitor_drives_submitted_task_to_done() {
        let session = FakeSession::script(vec![Ok(GridJobState::Running), Ok(GridJobState::Done)]);
        let (exec, state, task) = setup(session.clone(), fast()).await;
        let run = {
            let exec = exec.clone();
            let task = task.clone();
            tokio::spawn(async move { exec.execute(&task).await })
        };
        wait_for(&state, &task.id, ExecutionStatus::Running).await;
        assert_eq!(state.task(&task.id).await.unwrap().resource_id.as_deref(), Some("101"));

        exec.monitor().await.unwrap();
        exec.monitor().await.unwrap();
        assert_eq!(run.await.unwrap().unwrap(), ExecutionStatus::Done);
        assert_eq!(session.submitted.lock().unwrap()[0].name, "geoflow-ndvi");
    }

    #[tokio::test]
    async fn multi_host_reports_queued_until_seen_running() {
        let session =
            FakeSession::script(vec![Ok(GridJobState::Queued), Ok(GridJobState::Running)]);
        let cfg = GridBackendConfig {
            hosts: vec!["n1".into(), "n2".into()],
            ..fast()
        };
        let (exec, state, task) = setup(session, cfg).await;
        let run = {
            let exec = exec.clone();
            let task = task.clone();
            tokio::spawn(async move { exec.execute(&task).await })
        };
        wait_for(&state, &task.id, ExecutionStatus::QueuedActive).await;
        for _ in 0..20 {
            if state.task(&task.id).await.unwrap().resource_id.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        exec.monitor().await.unwrap();
        assert_eq!(state.task(&task.id).await.unwrap().status, ExecutionStatus::QueuedActive);
        exec.monitor().await.unwrap();
        assert_eq!(state.task(&task.id).await.unwrap().status, ExecutionStatus::Running);
        exec.stop(&state.task(&task.id).await.unwrap()).await.unwrap();
        assert_eq!(run.await.unwrap().unwrap(), ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn status_query_error_fails_the_task() {
        let lost = ExecError::Execution("qstat: no such job".into());
        let session = FakeSession::script(vec![Err(lost)]);
        let (exec, state, task) = setup(session, fast()).await;
        let run = {
            let exec = exec.clone();
            let task = task.clone();
            tokio::spawn(async move { exec.execute(&task).await })
        };
        wait_for(&state, &task.id, ExecutionStatus::Running).await;
        exec.monitor().await.unwrap();
        assert_eq!(run.await.unwrap().unwrap(), ExecutionStatus::Failed);
        let stored = state.task(&task.id).await.unwrap();
        assert!(stored.failure_reason.unwrap().contains("no such job"));
    }

    #[tokio::test]
    async fn connection_trouble_is_tolerated_by_the_monitor() {
        let session = FakeSession::script(vec![Err(ExecError::connection("grid", "qmaster down"))]);
        let (exec, state, task) = setup(session, fast()).await;
        let exec2 = exec.clone();
        let t2 = task.clone();
        let run = tokio::spawn(async move { exec2.execute(&t2).await });
        wait_for(&state, &task.id, ExecutionStatus::Running).await;
        exec.monitor().await.unwrap();
        assert_eq!(state.task(&task.id).await.unwrap().status, ExecutionStatus::Running);
        exec.close().await;
        assert_eq!(run.await.unwrap().unwrap(), ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn hold_and_release_map_to_statuses() {
        let session = FakeSession::script(Vec::new());
        let (exec, _state, mut task) = setup(session.clone(), fast()).await;
        task.resource_id = Some("77".into());
        assert_eq!(exec.suspend(&task).await.unwrap(), ExecutionStatus::Suspended);
        assert_eq!(exec.resume(&task).await.unwrap(), ExecutionStatus::QueuedActive);
        let controls: HashMap<_, _> = session
            .controls
            .lock()
            .unwrap()
            .iter()
            .map(|(id, a)| (*a, id.clone()))
            .collect();
        assert_eq!(controls[&GridControl::Hold], "77");
        assert_eq!(controls[&GridControl::Release], "77");
    }

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(String::from).collect()
    }

    #[test]
    fn parses_scheduler_output() {
        assert_eq!(parse_submit(&lines("4711\n")), Some("4711".into()));
        assert_eq!(parse_submit(&lines("4712.1-10:1")), Some("4712".into()));
        assert_eq!(
            parse_submit(&lines("Your job 4713 (\"geoflow-x\") has been submitted")),
            Some("4713".into())
        );

        let qstat = lines(
            "job-ID  prior   name       user  state submit/start at     queue        slots\n\
             ---------------------------------------------------------------------------\n\
             4711 0.55500 geoflow-a  geo   r     10/17/2026 10:00:00 all.q@n1     1\n\
             4712 0.00000 geoflow-b  geo   hqw   10/17/2026 10:01:00              1\n\
             4713 0.00000 geoflow-c  geo   Eqw   10/17/2026 10:01:00              1\n\
             4714 0.00000 geoflow-d  geo   qw    10/17/2026 10:01:00              1",
        );
        assert_eq!(parse_qstat(&qstat, "4711"), Some(GridJobState::Running));
        assert_eq!(parse_qstat(&qstat, "4712"), Some(GridJobState::Held));
        assert!(matches!(parse_qstat(&qstat, "4713"), Some(GridJobState::Failed(_))));
        assert_eq!(parse_qstat(&qstat, "4714"), Some(GridJobState::Queued));
        assert_eq!(parse_qstat(&qstat, "9999"), None);

        assert_eq!(parse_qacct(&lines("failed       0\nexit_status  0")), GridJobState::Done);
        assert_eq!(
            parse_qacct(&lines("failed       0\nexit_status  2")),
            GridJobState::Failed("exit code 2".into())
        );
        assert!(matches!(
            parse_qacct(&lines("failed       100 : assumedly after job\nexit_status  137")),
            GridJobState::Failed(_)
        ));
    }

    #[test]
    fn wraps_command_in_container() {
        let cfg = GridContainerConfig {
            image: "snap:9".into(),
            bind: "/mnt/eodata:/eodata".into(),
            volume_driver: Some("nfs".into()),
        };
        assert_eq!(
            container_wrap(&cfg, vec!["gpt".into(), "graph.xml".into()]),
            vec![
                "docker",
                "run",
                "-i",
                "--rm",
                "--volume-driver",
                "nfs",
                "-v",
                "/mnt/eodata:/eodata",
                "snap:9",
                "gpt",
                "graph.xml",
            ]
        );
    }

    #[test]
    fn submit_args_carry_name_and_queue() {
        let session = CliGridSession::new(
            Arc::new(crate::runner::LocalProcessRunner::new()),
            GridBackendConfig {
                queue: Some("eo.q".into()),
                ..Default::default()
            },
        );
        let args = session.submit_args(&GridJobTemplate {
            name: "geoflow-ndvi".into(),
            args: vec!["gpt".into()],
            queue: Some("eo.q".into()),
        });
        assert_eq!(
            args,
            vec!["qsub", "-terse", "-b", "y", "-N", "geoflow-ndvi", "-q", "eo.q", "gpt"]
        );
    }
}
