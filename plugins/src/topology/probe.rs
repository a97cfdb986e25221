use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use geoflow_core::error::{TopologyError, TopologyOp};
use geoflow_core::model::{NodeDescription, NodeServiceStatus, ServiceStatus, ToolInstallStatus};
use geoflow_core::runner::{
    run_command, CollectingConsumer, CommandRunner, CommandSpec, ExecutionMode,
};
use geoflow_core::topology::Installer;

lazy_static! {
    static ref VERSION: Regex = Regex::new(r"\d+(?:\.\d+)+").expect("valid regex");
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(1800);

/// Installs one tool when a cheap probe says it is missing.
///
/// The probe runs as the node user; install and uninstall run as super
/// user. A successful probe skips the install entirely.
pub struct ProbeInstaller {
    tool: String,
    probe: Vec<String>,
    install: Vec<String>,
    uninstall: Option<Vec<String>>,
    runner: Arc<dyn CommandRunner>,
}

/// Docker: probe `docker -v`, install `yum install -y docker`.
pub fn docker_installer(runner: Arc<dyn CommandRunner>) -> ProbeInstaller {
    ProbeInstaller::new(
        "docker",
        args(&["docker", "-v"]),
        args(&["yum", "install", "-y", "docker"]),
        runner,
    )
}

fn args(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl ProbeInstaller {
    pub fn new(
        tool: impl Into<String>,
        probe: Vec<String>,
        install: Vec<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            tool: tool.into(),
            probe,
            install,
            uninstall: None,
            runner,
        }
    }

    pub fn with_uninstall(mut self, uninstall: Vec<String>) -> Self {
        self.uninstall = Some(uninstall);
        self
    }

    async fn run(
        &self,
        op: TopologyOp,
        node: &NodeDescription,
        argv: &[String],
        mode: ExecutionMode,
        timeout: Duration,
    ) -> Result<(i32, Vec<String>), TopologyError> {
        let spec = CommandSpec::new(node.address(), &node.user, argv.to_vec())
            .with_password(node.password.clone())
            .with_mode(mode)
            .with_timeout(Some(timeout));
        let mut out = CollectingConsumer::default();
        let outcome = run_command(self.runner.as_ref(), &spec, &mut out, CancellationToken::new())
            .await
            .map_err(|e| {
                TopologyError::new(op, &node.hostname, e.to_string()).with_tool(&self.tool)
            })?;
        Ok((outcome.exit_code, out.lines))
    }

    /// Version reported by the probe, `None` when the tool is missing.
    async fn probe(&self, node: &NodeDescription) -> Result<Option<Option<String>>, TopologyError> {
        let (code, lines) = self
            .run(TopologyOp::Probe, node, &self.probe, ExecutionMode::User, PROBE_TIMEOUT)
            .await?;
        if code != 0 {
            tracing::debug!(
                host = %node.hostname,
                tool = %self.tool,
                code,
                "probe says not installed"
            );
            return Ok(None);
        }
        let version = lines
            .iter()
            .find_map(|l| VERSION.find(l).map(|m| m.as_str().to_string()));
        Ok(Some(version))
    }

    fn record(&self, node: &mut NodeDescription, status: ServiceStatus, version: Option<String>) {
        node.set_service_status(NodeServiceStatus {
            service: self.tool.clone(),
            version,
            status,
        });
    }
}

#[async_trait]
impl Installer for ProbeInstaller {
    fn name(&self) -> &str {
        &self.tool
    }

    async fn set_master_node_info(&self, _master: &NodeDescription) {}

    async fn install_new_node(
        &self,
        node: &mut NodeDescription,
    ) -> Result<Vec<ToolInstallStatus>, TopologyError> {
        if let Some(version) = self.probe(node).await? {
            tracing::info!(
                host = %node.hostname,
                tool = %self.tool,
                version = ?version,
                "already installed"
            );
            self.record(node, ServiceStatus::Installed, version);
            return Ok(vec![ToolInstallStatus::ok(&self.tool, ServiceStatus::Installed)]);
        }

        tracing::info!(host = %node.hostname, tool = %self.tool, "installing");
        let (code, lines) = self
            .run(
                TopologyOp::Install,
                node,
                &self.install,
                ExecutionMode::SuperUser,
                INSTALL_TIMEOUT,
            )
            .await?;
        if code != 0 {
            self.record(node, ServiceStatus::Error, None);
            let tail = lines.last().cloned().unwrap_or_default();
            return Err(TopologyError::new(
                TopologyOp::Install,
                &node.hostname,
                format!("{} installation failed: {tail}", self.tool),
            )
            .with_exit_code(code)
            .with_tool(&self.tool));
        }

        let version = self.probe(node).await?.flatten();
        self.record(node, ServiceStatus::Installed, version);
        Ok(vec![ToolInstallStatus::ok(&self.tool, ServiceStatus::Installed)])
    }

    async fn uninstall_node(
        &self,
        node: &mut NodeDescription,
    ) -> Result<Vec<ToolInstallStatus>, TopologyError> {
        let Some(uninstall) = &self.uninstall else {
            return Ok(Vec::new());
        };
        let (code, _) = self
            .run(TopologyOp::Uninstall, node, uninstall, ExecutionMode::SuperUser, INSTALL_TIMEOUT)
            .await?;
        if code != 0 {
            return Err(TopologyError::new(
                TopologyOp::Uninstall,
                &node.hostname,
                format!("{} removal failed", self.tool),
            )
            .with_exit_code(code)
            .with_tool(&self.tool));
        }
        self.record(node, ServiceStatus::Uninstalled, None);
        Ok(vec![ToolInstallStatus::ok(&self.tool, ServiceStatus::Uninstalled)])
    }
}
