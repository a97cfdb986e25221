use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use geoflow_core::dispatch::{BackendExecutor, ProgressConsumer, TaskReporter};
use geoflow_core::error::ExecError;
use geoflow_core::executor::CommandBuilder;
use geoflow_core::model::{ExecutionStatus, ExecutionTask, NodeDescription, ProcessingComponent};
use geoflow_core::runner::{
    run_command, start_command, CollectingConsumer, CommandRunner, CommandSpec, LineConsumer,
    Signal,
};
use geoflow_core::state::ExecutionStateManager;
use geoflow_core::topology::TopologyManager;

use super::{component_of, resource_of, InFlight};

pub const SSH_BACKEND: &str = "ssh";
const PID_MARKER: &str = "geoflow-pid:";

/// Runs component commands on cluster nodes over SSH.
///
/// Each task goes to the least busy healthy node. A node that fails to
/// connect is benched for a cooldown so retries land elsewhere. The remote
/// shell announces its pid first; that pid (the process group leader of the
/// session) is the resource id used to signal the task.
pub struct SshExecutor {
    runner: Arc<dyn CommandRunner>,
    commands: Arc<dyn CommandBuilder>,
    topology: Arc<TopologyManager>,
    reporter: TaskReporter,
    hosts: Vec<String>,
    cooldown: Duration,
    timeout: Option<Duration>,
    nodes: Mutex<NodeBook>,
    remote: Mutex<HashMap<String, RemoteProcess>>,
    in_flight: InFlight,
}

#[derive(Default)]
struct NodeBook {
    benched_until: HashMap<String, Instant>,
    running: HashMap<String, usize>,
}

#[derive(Clone)]
struct RemoteProcess {
    node: NodeDescription,
    pid: String,
}

impl SshExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        commands: Arc<dyn CommandBuilder>,
        topology: Arc<TopologyManager>,
        state: ExecutionStateManager,
    ) -> Self {
        Self {
            runner,
            commands,
            topology,
            reporter: TaskReporter::new(state, SSH_BACKEND),
            hosts: Vec::new(),
            cooldown: Duration::from_secs(30),
            timeout: None,
            nodes: Mutex::new(NodeBook::default()),
            remote: Mutex::new(HashMap::new()),
            in_flight: InFlight::default(),
        }
    }

    /// Restricts execution to these hosts instead of every worker node.
    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Copies a local file or directory into `remote_dir` on `hostname`.
    pub async fn upload(
        &self,
        hostname: &str,
        local: &Path,
        remote_dir: &str,
    ) -> Result<(), ExecError> {
        let node = self.node_for(hostname).await;
        self.runner
            .upload(node.address(), &node.user, node.password.as_deref(), local, remote_dir)
            .await
    }

    /// The topology's record of `host`; unknown hosts borrow the master's
    /// credentials.
    async fn node_for(&self, host: &str) -> NodeDescription {
        if let Some(node) = self.topology.get(host).await {
            return node;
        }
        let master = self.topology.master_node().await;
        let mut node = NodeDescription::new(host, master.user.clone());
        node.password = master.password.clone();
        node
    }

    async fn candidates(&self) -> Vec<NodeDescription> {
        if !self.hosts.is_empty() {
            let mut nodes = Vec::with_capacity(self.hosts.len());
            for host in &self.hosts {
                nodes.push(self.node_for(host).await);
            }
            return nodes;
        }
        let workers: Vec<NodeDescription> = self
            .topology
            .list()
            .await
            .into_iter()
            .filter(|n| !n.is_master())
            .collect();
        if workers.is_empty() {
            vec![self.topology.master_node().await]
        } else {
            workers
        }
    }

    /// Least busy node that is neither benched nor known unreachable. Falls
    /// back to any unbenched node, then to the least busy node overall.
    async fn select_node(&self) -> Result<NodeDescription, ExecError> {
        let candidates = self.candidates().await;
        let mut book = self.nodes.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        book.benched_until.retain(|_, until| *until > now);
        let load = |n: &&NodeDescription| book.running.get(&n.hostname).copied().unwrap_or(0);
        let unbenched = |n: &&NodeDescription| !book.benched_until.contains_key(&n.hostname);
        let chosen = candidates
            .iter()
            .filter(|n| unbenched(n) && !n.known_unreachable())
            .min_by_key(load)
            .or_else(|| candidates.iter().filter(unbenched).min_by_key(load))
            .or_else(|| candidates.iter().min_by_key(load))
            .cloned()
            .ok_or_else(|| ExecError::Config("no ssh execution hosts".to_string()))?;
        *book.running.entry(chosen.hostname.clone()).or_default() += 1;
        Ok(chosen)
    }

    fn release_node(&self, node: &NodeDescription, error: Option<&ExecError>) {
        let mut book = self.nodes.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(count) = book.running.get_mut(&node.hostname) {
            *count = count.saturating_sub(1);
        }
        if let Some(err) = error {
            if err.is_retryable() || err.is_fatal_for_node() {
                tracing::warn!(
                    host = %node.hostname,
                    error = %err,
                    cooldown_secs = self.cooldown.as_secs(),
                    "benching ssh node"
                );
                book.benched_until
                    .insert(node.hostname.clone(), Instant::now() + self.cooldown);
            }
        }
    }

    async fn run_on(
        &self,
        task: &ExecutionTask,
        node: &NodeDescription,
        args: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<ExecutionStatus, ExecError> {
        let mut wrapped = vec!["echo".to_string(), format!("{PID_MARKER}$$"), ";".to_string()];
        wrapped.extend(args);
        let spec = CommandSpec::new(node.address(), &node.user, wrapped)
            .with_password(node.password.clone())
            .with_timeout(self.timeout);

        let running = start_command(self.runner.as_ref(), &spec).await?;
        let (pid_tx, pid_rx) = oneshot::channel();
        let mut consumer = PidMarker {
            pid_tx: Some(pid_tx),
            inner: self.reporter.progress(task),
        };
        let accept = async {
            let Ok(pid) = pid_rx.await else {
                return;
            };
            self.remote_lock().insert(
                task.id.clone(),
                RemoteProcess {
                    node: node.clone(),
                    pid: pid.clone(),
                },
            );
            let resource_id = format!("{}:{pid}", node.hostname);
            if let Err(e) = self
                .reporter
                .accepted(task, &resource_id, Some(&node.hostname), ExecutionStatus::Running)
                .await
            {
                tracing::warn!(task_id = %task.id, error = %e, "could not record ssh task start");
            }
        };
        let (outcome, ()) = tokio::join!(running.finish(&mut consumer, cancel), accept);
        let outcome = outcome?;

        if outcome.cancelled {
            return self
                .reporter
                .mark(&task.id, ExecutionStatus::Cancelled, Some("stopped".to_string()))
                .await;
        }
        self.reporter.finished(&task.id, outcome.exit_code).await
    }

    fn remote_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RemoteProcess>> {
        self.remote.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Where a task's shell runs: the live record, else the persisted
    /// `host:pid` resource id.
    async fn locate(&self, task: &ExecutionTask) -> Result<RemoteProcess, ExecError> {
        if let Some(found) = self.remote_lock().get(&task.id).cloned() {
            return Ok(found);
        }
        let resource = resource_of(SSH_BACKEND, task)?;
        let (host, pid) = resource
            .rsplit_once(':')
            .ok_or_else(|| ExecError::Execution(format!("malformed ssh resource id {resource}")))?;
        let node = self.node_for(host).await;
        Ok(RemoteProcess {
            node,
            pid: pid.to_string(),
        })
    }

    /// Signals the whole process group of the task's remote shell.
    async fn signal(&self, task: &ExecutionTask, signal: Signal) -> Result<(), ExecError> {
        let target = self.locate(task).await?;
        let spec = CommandSpec::new(
            target.node.address(),
            &target.node.user,
            vec![
                "kill".to_string(),
                format!("-{}", signal.number()),
                "--".to_string(),
                format!("-{}", target.pid),
            ],
        )
        .with_password(target.node.password.clone())
        .with_timeout(Some(Duration::from_secs(30)));
        let mut out = CollectingConsumer::default();
        let outcome =
            run_command(self.runner.as_ref(), &spec, &mut out, CancellationToken::new()).await?;
        if outcome.exit_code != 0 {
            return Err(ExecError::Execution(format!(
                "kill -{} on {} exited with {}: {}",
                signal.number(),
                target.node.hostname,
                outcome.exit_code,
                out.lines.join(" ")
            )));
        }
        Ok(())
    }
}

/// Pulls the pid announcement out of the output stream.
struct PidMarker {
    pid_tx: Option<oneshot::Sender<String>>,
    inner: ProgressConsumer,
}

impl LineConsumer for PidMarker {
    fn consume(&mut self, line: &str) {
        if self.pid_tx.is_some() {
            if let Some(pid) = line.trim().strip_prefix(PID_MARKER) {
                if let Some(tx) = self.pid_tx.take() {
                    let _ = tx.send(pid.to_string());
                }
                return;
            }
        }
        self.inner.consume(line);
    }
}

#[async_trait]
impl BackendExecutor for SshExecutor {
    fn name(&self) -> &str {
        SSH_BACKEND
    }

    async fn initialize(&self) -> Result<(), ExecError> {
        let candidates = self.candidates().await;
        if candidates.is_empty() {
            return Err(ExecError::Config("no ssh execution hosts".to_string()));
        }
        for node in &candidates {
            let ok = self
                .runner
                .can_connect(node.address(), &node.user, node.password.as_deref())
                .await;
            if !ok {
                tracing::warn!(host = %node.hostname, "ssh host not reachable at startup");
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.in_flight.cancel_all();
    }

    fn supports(&self, component: &ProcessingComponent) -> bool {
        component.container.is_none() && component.wants_backend(SSH_BACKEND)
    }

    async fn execute(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        component_of(task)?;
        let args = self.commands.build(task).await?;
        let node = self.select_node().await?;
        tracing::debug!(task_id = %task.id, host = %node.hostname, "running over ssh");

        let cancel = self.in_flight.register(&task.id);
        let result = self.run_on(task, &node, args, cancel).await;
        self.in_flight.finish(&task.id);
        self.remote_lock().remove(&task.id);
        self.release_node(&node, result.as_ref().err());
        result
    }

    async fn stop(&self, task: &ExecutionTask) -> Result<(), ExecError> {
        // Closing the local client does not reach a detached remote group.
        let remote = self.signal(task, Signal::Kill).await;
        self.in_flight.cancel(&task.id);
        remote
    }

    async fn suspend(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        self.signal(task, Signal::Suspend).await?;
        Ok(ExecutionStatus::Suspended)
    }

    async fn resume(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        self.signal(task, Signal::Resume).await?;
        Ok(ExecutionStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use geoflow_core::executor::TemplateCommandBuilder;
    use geoflow_core::persistence::InMemoryPersistence;

    use super::*;
    use crate::runner::LocalProcessRunner;

    fn executor(hosts: Vec<&str>) -> SshExecutor {
        executor_over(hosts, Arc::new(LocalProcessRunner::new())).0
    }

    fn executor_over(
        hosts: Vec<&str>,
        runner: Arc<dyn CommandRunner>,
    ) -> (SshExecutor, Arc<TopologyManager>) {
        let store = Arc::new(InMemoryPersistence::new());
        let topology = Arc::new(TopologyManager::new(
            NodeDescription::new("master", "geo").as_master(),
            Vec::new(),
            Arc::new(LocalProcessRunner::new()),
            store.clone(),
        ));
        let exec = SshExecutor::new(
            runner,
            Arc::new(TemplateCommandBuilder),
            topology.clone(),
            ExecutionStateManager::new(store),
        )
        .with_hosts(hosts.into_iter().map(String::from).collect());
        (exec, topology)
    }

    #[tokio::test]
    async fn spreads_tasks_over_hosts() {
        let exec = executor(vec!["w1", "w2"]);
        let first = exec.select_node().await.unwrap();
        let second = exec.select_node().await.unwrap();
        assert_ne!(first.hostname, second.hostname);
        assert_eq!(first.user, "geo");
    }

    #[tokio::test]
    async fn connection_failure_benches_the_node() {
        let exec = executor(vec!["w1", "w2"]);
        let w1 = NodeDescription::new("w1", "geo");
        *exec.nodes.lock().unwrap().running.entry("w1".into()).or_default() += 1;
        exec.release_node(&w1, Some(&ExecError::connection("w1", "no route to host")));
        for _ in 0..3 {
            let node = exec.select_node().await.unwrap();
            assert_eq!(node.hostname, "w2");
        }
    }

    #[tokio::test]
    async fn unreachable_nodes_are_skipped_while_others_answer() {
        let (exec, topology) = executor_over(vec![], Arc::new(LocalProcessRunner::new()));
        let mut down = NodeDescription::new("w1", "geo");
        down.reachable = Some(false);
        let mut up = NodeDescription::new("w2", "geo");
        up.reachable = Some(true);
        topology.seed(vec![down, up]).await.unwrap();

        for _ in 0..3 {
            assert_eq!(exec.select_node().await.unwrap().hostname, "w2");
        }

        // Benching the only answering node leaves the unreachable one.
        let w2 = NodeDescription::new("w2", "geo");
        exec.release_node(&w2, Some(&ExecError::connection("w2", "Connection reset")));
        assert_eq!(exec.select_node().await.unwrap().hostname, "w1");
    }

    #[tokio::test]
    async fn upload_uses_the_node_credentials() {
        use std::os::unix::fs::PermissionsExt;

        use geoflow_core::config::RemoteConfig;

        use crate::runner::SshRunner;

        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args");
        let sftp = dir.path().join("sftp");
        let script = format!(
            "#!/bin/sh\ncat > /dev/null\necho \"$@\" > '{}'\n",
            args_file.display()
        );
        std::fs::write(&sftp, script).unwrap();
        std::fs::set_permissions(&sftp, std::fs::Permissions::from_mode(0o755)).unwrap();
        let runner = SshRunner::new(RemoteConfig {
            sftp_bin: sftp.to_string_lossy().into_owned(),
            ..RemoteConfig::default()
        });
        let (exec, topology) = executor_over(vec![], Arc::new(runner));
        topology.seed(vec![NodeDescription::new("w1", "ops")]).await.unwrap();
        let tile = dir.path().join("tile.tif");
        std::fs::write(&tile, "t").unwrap();

        exec.upload("w1", &tile, "/data").await.unwrap();
        let args = std::fs::read_to_string(&args_file).unwrap();
        assert!(args.trim_end().ends_with("-b - ops@w1"), "{args}");

        exec.upload("elsewhere", &tile, "/data").await.unwrap();
        let args = std::fs::read_to_string(&args_file).unwrap();
        assert!(args.trim_end().ends_with("geo@elsewhere"), "{args}");
    }

    #[tokio::test]
    async fn task_failures_do_not_bench() {
        let exec = executor(vec!["w1"]);
        let w1 = exec.select_node().await.unwrap();
        exec.release_node(&w1, Some(&ExecError::Execution("exit code 1".into())));
        assert!(exec.nodes.lock().unwrap().benched_until.is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_master_without_workers() {
        let exec = executor(Vec::new());
        assert_eq!(exec.select_node().await.unwrap().hostname, "master");
    }

    #[test]
    fn pid_marker_is_not_forwarded() {
        let state = ExecutionStateManager::new(Arc::new(InMemoryPersistence::new()));
        let reporter = TaskReporter::new(state, SSH_BACKEND);
        let task = ExecutionTask::component("t1", "j1", ProcessingComponent::new("c", "true"));
        let (tx, mut rx) = oneshot::channel();
        let mut marker = PidMarker {
            pid_tx: Some(tx),
            inner: reporter.progress(&task),
        };
        marker.consume("geoflow-pid:4242");
        marker.consume("geoflow-pid:1");
        assert_eq!(rx.try_recv().unwrap(), "4242");
        assert!(marker.pid_tx.is_none());
    }
}
