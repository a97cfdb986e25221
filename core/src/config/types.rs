use serde::{Deserialize, Serialize};

use crate::container::ContainerRuntime;
use crate::executor::types::{ConcurrencyConfig, RetryConfig};
use crate::model::NodeDescription;
use crate::runner::ExecutionMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub container: ContainerConfig,

    /// Backends to register, in dispatch priority order.
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub topology: TopologyConfig,
}

fn default_backends() -> Vec<BackendConfig> {
    vec![BackendConfig::Process(ProcessBackendConfig::default())]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            executor: ExecutorConfig::default(),
            retry: RetryConfig::default(),
            remote: RemoteConfig::default(),
            container: ContainerConfig::default(),
            backends: default_backends(),
            topology: TopologyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to `geoflow.log` under `directory`.
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "geoflow_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently running tasks; 0 means one per core.
    #[serde(default)]
    pub max_concurrency: usize,

    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Wall-clock limit of one command; unset means no limit.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// How long the worker loop sleeps when the queue is empty.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

fn default_monitor_interval_ms() -> u64 {
    5000
}

fn default_idle_poll_ms() -> u64 {
    1000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            monitor_interval_ms: default_monitor_interval_ms(),
            command_timeout_secs: None,
            idle_poll_ms: default_idle_poll_ms(),
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn effective_max_concurrency(&self) -> usize {
        if self.max_concurrency == 0 {
            num_cpus::get().max(1)
        } else {
            self.max_concurrency
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_ssh_bin")]
    pub ssh_bin: String,

    #[serde(default = "default_sshpass_bin")]
    pub sshpass_bin: String,

    /// Client used for file uploads, driven in batch mode.
    #[serde(default = "default_sftp_bin")]
    pub sftp_bin: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default)]
    pub strict_host_key_checking: bool,
}

fn default_ssh_bin() -> String {
    "ssh".to_string()
}

fn default_sshpass_bin() -> String {
    "sshpass".to_string()
}

fn default_sftp_bin() -> String {
    "sftp".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    1
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_bin: default_ssh_bin(),
            sshpass_bin: default_sshpass_bin(),
            sftp_bin: default_sftp_bin(),
            connect_timeout_secs: default_connect_timeout_secs(),
            port: default_ssh_port(),
            strict_host_key_checking: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default)]
    pub runtime: ContainerRuntime,

    /// Registry prefixed to images that do not name one.
    #[serde(default)]
    pub registry: Option<String>,

    #[serde(default)]
    pub volume_driver: Option<String>,

    /// Extra `docker run` options, e.g. `--rm`.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum BackendConfig {
    Process(ProcessBackendConfig),
    Ssh(SshBackendConfig),
    Container(ContainerBackendConfig),
    Grid(GridBackendConfig),
}

impl BackendConfig {
    pub fn provider(&self) -> &'static str {
        match self {
            BackendConfig::Process(_) => "process",
            BackendConfig::Ssh(_) => "ssh",
            BackendConfig::Container(_) => "container",
            BackendConfig::Grid(_) => "grid",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessBackendConfig {
    #[serde(default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshBackendConfig {
    /// Restricts execution to these hosts; empty means every worker node.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Seconds a host is skipped after a connection failure.
    #[serde(default = "default_unhealthy_cooldown_secs")]
    pub unhealthy_cooldown_secs: u64,
}

fn default_unhealthy_cooldown_secs() -> u64 {
    30
}

impl Default for SshBackendConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            unhealthy_cooldown_secs: default_unhealthy_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerHost {
    Local,
    Master,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerBackendConfig {
    /// Where `docker` runs: this host, or the master over SSH.
    #[serde(default = "default_container_host")]
    pub host: ContainerHost,
}

fn default_container_host() -> ContainerHost {
    ContainerHost::Local
}

impl Default for ContainerBackendConfig {
    fn default() -> Self {
        Self {
            host: default_container_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridBackendConfig {
    #[serde(default = "default_qsub_bin")]
    pub qsub_bin: String,
    #[serde(default = "default_qstat_bin")]
    pub qstat_bin: String,
    #[serde(default = "default_qdel_bin")]
    pub qdel_bin: String,
    #[serde(default = "default_qhold_bin")]
    pub qhold_bin: String,
    #[serde(default = "default_qrls_bin")]
    pub qrls_bin: String,
    /// Accounting lookup for jobs that left the scheduler queue.
    #[serde(default = "default_qacct_bin")]
    pub qacct_bin: String,

    #[serde(default)]
    pub queue: Option<String>,

    /// Execution hosts behind the scheduler. With more than one, submitted
    /// jobs are reported queued until the monitor sees them run.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Poll interval while waiting for a submitted job to start.
    #[serde(default = "default_start_poll_ms")]
    pub start_poll_ms: u64,

    /// When set, components run inside this image on the execution host.
    #[serde(default)]
    pub container: Option<GridContainerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridContainerConfig {
    pub image: String,
    /// `host:container` bind mount.
    pub bind: String,
    #[serde(default)]
    pub volume_driver: Option<String>,
}

fn default_qsub_bin() -> String {
    "qsub".to_string()
}

fn default_qstat_bin() -> String {
    "qstat".to_string()
}

fn default_qdel_bin() -> String {
    "qdel".to_string()
}

fn default_qhold_bin() -> String {
    "qhold".to_string()
}

fn default_qrls_bin() -> String {
    "qrls".to_string()
}

fn default_qacct_bin() -> String {
    "qacct".to_string()
}

fn default_start_poll_ms() -> u64 {
    1000
}

impl Default for GridBackendConfig {
    fn default() -> Self {
        Self {
            qsub_bin: default_qsub_bin(),
            qstat_bin: default_qstat_bin(),
            qdel_bin: default_qdel_bin(),
            qhold_bin: default_qhold_bin(),
            qrls_bin: default_qrls_bin(),
            qacct_bin: default_qacct_bin(),
            queue: None,
            hosts: Vec::new(),
            start_poll_ms: default_start_poll_ms(),
            container: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default = "default_master")]
    pub master: NodeDescription,

    #[serde(default)]
    pub nodes: Vec<NodeDescription>,

    /// Root directory substituted for `#INSTALL_SCRIPTS_ROOT_PATH#`.
    #[serde(default = "default_install_scripts_root")]
    pub install_scripts_root: String,

    /// Install the container runtime on new nodes.
    #[serde(default = "default_install_docker")]
    pub install_docker: bool,

    #[serde(default)]
    pub tools: Vec<ToolInstallConfig>,
}

fn default_master() -> NodeDescription {
    let user = std::env::var("USER").unwrap_or_else(|_| "root".to_string());
    NodeDescription::new("localhost", user).as_master()
}

fn default_install_scripts_root() -> String {
    "/opt/geoflow/tools_scripts".to_string()
}

fn default_install_docker() -> bool {
    true
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            master: default_master(),
            nodes: Vec::new(),
            install_scripts_root: default_install_scripts_root(),
            install_docker: default_install_docker(),
            tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInstallConfig {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub install_steps: Vec<ToolInstallStep>,
    #[serde(default)]
    pub uninstall_steps: Vec<ToolInstallStep>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationType {
    /// Runs on the master host.
    Process,
    /// Runs on the node being installed.
    #[default]
    Ssh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInstallStep {
    pub name: String,
    #[serde(default)]
    pub invocation: InvocationType,
    pub command: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub ignore_err: bool,
}
