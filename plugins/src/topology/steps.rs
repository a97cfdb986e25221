use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use geoflow_core::config::{InvocationType, ToolInstallConfig, ToolInstallStep};
use geoflow_core::error::{TopologyError, TopologyOp};
use geoflow_core::model::{NodeDescription, NodeServiceStatus, ServiceStatus, ToolInstallStatus};
use geoflow_core::runner::{
    run_command, split_command, CollectingConsumer, CommandRunner, CommandSpec,
};
use geoflow_core::topology::Installer;

lazy_static! {
    static ref STEP_OUTPUT: Regex = Regex::new(r"#STEP_OUTPUT-([^#]+)#").expect("valid regex");
}

/// Installs configured tools by running their steps in order.
///
/// `process` steps run on this host with the master's credentials, `ssh`
/// steps on the node (or the step's own host) with the node's credentials.
/// Step commands are templates over `#MASTER_*#`, `#NODE_*#`,
/// `#INSTALL_SCRIPTS_ROOT_PATH#` and `#STEP_OUTPUT-<step>#`.
pub struct StepInstaller {
    tools: Vec<ToolInstallConfig>,
    scripts_root: String,
    local: Arc<dyn CommandRunner>,
    remote: Arc<dyn CommandRunner>,
    master: RwLock<NodeDescription>,
}

/// Where a tool's steps are in a run.
struct StepRun<'a> {
    op: TopologyOp,
    tool: &'a ToolInstallConfig,
    outputs: HashMap<String, String>,
}

impl StepInstaller {
    pub fn new(
        tools: Vec<ToolInstallConfig>,
        scripts_root: impl Into<String>,
        master: NodeDescription,
        local: Arc<dyn CommandRunner>,
        remote: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            tools,
            scripts_root: scripts_root.into(),
            local,
            remote,
            master: RwLock::new(master),
        }
    }

    /// Fills the template tokens of a step command.
    fn render(
        &self,
        template: &str,
        master: &NodeDescription,
        node: &NodeDescription,
        run: &StepRun<'_>,
    ) -> Result<String, TopologyError> {
        let text = template
            .replace("#MASTER_HOSTNAME#", master.address())
            .replace("#MASTER_USER#", &master.user)
            .replace("#MASTER_PASS#", master.password.as_deref().unwrap_or_default())
            .replace("#NODE_HOSTNAME#", node.address())
            .replace("#NODE_USER#", &node.user)
            .replace("#NODE_PASS#", node.password.as_deref().unwrap_or_default())
            .replace("#NODE_PROCESSORS_CNT#", &node.processors.to_string())
            .replace("#INSTALL_SCRIPTS_ROOT_PATH#", &self.scripts_root);

        let mut missing = None;
        let text = STEP_OUTPUT.replace_all(&text, |caps: &Captures| {
            match run.outputs.get(&caps[1]) {
                Some(out) => out.clone(),
                None => {
                    missing.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });
        if let Some(step) = missing {
            return Err(TopologyError::new(
                run.op,
                &node.hostname,
                format!("no output recorded for step '{step}'"),
            )
            .with_tool(&run.tool.name));
        }
        Ok(text.into_owned())
    }

    fn command_for(
        &self,
        step: &ToolInstallStep,
        argv: Vec<String>,
        master: &NodeDescription,
        node: &NodeDescription,
    ) -> (Arc<dyn CommandRunner>, CommandSpec) {
        let (runner, host, user, password) = match step.invocation {
            InvocationType::Process => (
                self.local.clone(),
                "localhost".to_string(),
                master.user.clone(),
                master.password.clone(),
            ),
            InvocationType::Ssh => (
                self.remote.clone(),
                step.host.clone().unwrap_or_else(|| node.address().to_string()),
                node.user.clone(),
                node.password.clone(),
            ),
        };
        let spec = CommandSpec::new(host, step.user.clone().unwrap_or(user), argv)
            .with_password(step.password.clone().or(password))
            .with_mode(step.mode)
            .with_timeout(step.timeout_secs.map(Duration::from_secs));
        (runner, spec)
    }

    async fn run_step(
        &self,
        step: &ToolInstallStep,
        master: &NodeDescription,
        node: &NodeDescription,
        run: &mut StepRun<'_>,
    ) -> Result<(), TopologyError> {
        let command = self.render(&step.command, master, node, run)?;
        let (runner, spec) = self.command_for(step, split_command(&command), master, node);
        tracing::debug!(
            host = %node.hostname,
            tool = %run.tool.name,
            step = %step.name,
            "running install step"
        );

        let mut out = CollectingConsumer::default();
        let result = run_command(runner.as_ref(), &spec, &mut out, CancellationToken::new()).await;
        let failure = match result {
            Ok(outcome) if outcome.exit_code == 0 => None,
            Ok(outcome) => Some(
                TopologyError::new(run.op, &node.hostname, format!("step '{}' failed", step.name))
                    .with_exit_code(outcome.exit_code),
            ),
            Err(e) => Some(TopologyError::new(
                run.op,
                &node.hostname,
                format!("step '{}': {e}", step.name),
            )),
        };

        let first = out.lines.iter().map(|l| l.trim()).find(|l| !l.is_empty()).unwrap_or_default();
        run.outputs.insert(step.name.clone(), first.to_string());

        match failure {
            Some(err) if step.ignore_err => {
                tracing::warn!(
                    host = %node.hostname,
                    tool = %run.tool.name,
                    step = %step.name,
                    error = %err,
                    "install step failed, ignored"
                );
                Ok(())
            }
            Some(err) => Err(err.with_tool(&run.tool.name)),
            None => Ok(()),
        }
    }

    async fn run_tools(
        &self,
        op: TopologyOp,
        node: &mut NodeDescription,
    ) -> Vec<ToolInstallStatus> {
        let master = self.master.read().await.clone();
        let mut statuses = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            let steps = match op {
                TopologyOp::Uninstall => &tool.uninstall_steps,
                _ => &tool.install_steps,
            };
            let mut run = StepRun {
                op,
                tool,
                outputs: HashMap::new(),
            };
            let mut result = Ok(());
            for step in steps {
                result = self.run_step(step, &master, node, &mut run).await;
                if result.is_err() {
                    break;
                }
            }

            let done = match op {
                TopologyOp::Uninstall => ServiceStatus::Uninstalled,
                _ => ServiceStatus::Installed,
            };
            let (service_status, install_status) = match result {
                Ok(()) => {
                    tracing::info!(
                        host = %node.hostname,
                        tool = %tool.name,
                        op = %op,
                        "tool steps completed"
                    );
                    (done, ToolInstallStatus::ok(&tool.name, done))
                }
                Err(err) => {
                    tracing::error!(
                        host = %node.hostname,
                        tool = %tool.name,
                        error = %err,
                        "tool steps aborted"
                    );
                    (ServiceStatus::Error, ToolInstallStatus::error(&tool.name, err.to_string()))
                }
            };
            node.set_service_status(NodeServiceStatus {
                service: tool.name.clone(),
                version: tool.version.clone(),
                status: service_status,
            });
            statuses.push(install_status);
        }
        statuses
    }
}

#[async_trait]
impl Installer for StepInstaller {
    fn name(&self) -> &str {
        "tools"
    }

    async fn set_master_node_info(&self, master: &NodeDescription) {
        *self.master.write().await = master.clone();
    }

    async fn install_new_node(
        &self,
        node: &mut NodeDescription,
    ) -> Result<Vec<ToolInstallStatus>, TopologyError> {
        Ok(self.run_tools(TopologyOp::Install, node).await)
    }

    async fn uninstall_node(
        &self,
        node: &mut NodeDescription,
    ) -> Result<Vec<ToolInstallStatus>, TopologyError> {
        Ok(self.run_tools(TopologyOp::Uninstall, node).await)
    }
}

#[cfg(test)]
mod tests {
    use geoflow_core::runner::ExecutionMode;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_support::ScriptedRunner;

    fn step(name: &str, invocation: InvocationType, command: &str) -> ToolInstallStep {
        ToolInstallStep {
            name: name.to_string(),
            invocation,
            command: command.to_string(),
            host: None,
            user: None,
            password: None,
            mode: ExecutionMode::User,
            timeout_secs: None,
            ignore_err: false,
        }
    }

    fn tool(name: &str, steps: Vec<ToolInstallStep>) -> ToolInstallConfig {
        ToolInstallConfig {
            name: name.to_string(),
            version: Some("1.2".to_string()),
            description: String::new(),
            install_steps: steps,
            uninstall_steps: Vec::new(),
        }
    }

    fn installer(
        tools: Vec<ToolInstallConfig>,
        local: Arc<ScriptedRunner>,
        remote: Arc<ScriptedRunner>,
    ) -> StepInstaller {
        StepInstaller::new(
            tools,
            "/opt/geoflow/tools_scripts",
            NodeDescription::new("master", "admin").with_password("mpw"),
            local,
            remote,
        )
    }

    fn worker() -> NodeDescription {
        let mut node = NodeDescription::new("worker-1", "geo").with_password("npw");
        node.processors = 8;
        node
    }

    #[tokio::test]
    async fn tokens_and_step_outputs_are_substituted() {
        let local =
            Arc::new(ScriptedRunner::default().reply("gen-token", 0, "\n  tok-123  \nmore\n"));
        let remote = Arc::new(ScriptedRunner::default());
        let tools = vec![tool(
            "slurm",
            vec![
                step(
                    "token",
                    InvocationType::Process,
                    "#INSTALL_SCRIPTS_ROOT_PATH#/gen-token #MASTER_HOSTNAME#",
                ),
                step(
                    "join",
                    InvocationType::Ssh,
                    "join.sh #STEP_OUTPUT-token# #NODE_HOSTNAME# #NODE_PROCESSORS_CNT# \
                     #MASTER_USER#",
                ),
            ],
        )];
        let mut node = worker();
        let statuses = installer(tools, local.clone(), remote.clone())
            .install_new_node(&mut node)
            .await
            .unwrap();

        assert_eq!(statuses, vec![ToolInstallStatus::ok("slurm", ServiceStatus::Installed)]);
        assert_eq!(local.lines(), vec!["/opt/geoflow/tools_scripts/gen-token master"]);
        assert_eq!(remote.lines(), vec!["join.sh tok-123 worker-1 8 admin"]);

        let local_call = local.calls.lock().unwrap()[0].clone();
        assert_eq!((local_call.host.as_str(), local_call.user.as_str()), ("localhost", "admin"));
        assert_eq!(local_call.password.as_deref(), Some("mpw"));
        let remote_call = remote.calls.lock().unwrap()[0].clone();
        assert_eq!((remote_call.host.as_str(), remote_call.user.as_str()), ("worker-1", "geo"));
        assert_eq!(remote_call.password.as_deref(), Some("npw"));

        assert_eq!(node.services[0].version.as_deref(), Some("1.2"));
        assert_eq!(node.services[0].status, ServiceStatus::Installed);
    }

    #[tokio::test]
    async fn failing_step_aborts_only_its_tool() {
        let remote = Arc::new(
            ScriptedRunner::default()
                .reply("optional", 3, "")
                .reply("broken", 2, "boom"),
        );
        let mut lenient = step("opt", InvocationType::Ssh, "optional-check");
        lenient.ignore_err = true;
        let tools = vec![
            tool(
                "first",
                vec![
                    lenient,
                    step("bad", InvocationType::Ssh, "broken"),
                    step("never", InvocationType::Ssh, "unreached"),
                ],
            ),
            tool("second", vec![step("ok", InvocationType::Ssh, "fine")]),
        ];
        let mut node = worker();
        let statuses = installer(tools, Arc::new(ScriptedRunner::default()), remote.clone())
            .install_new_node(&mut node)
            .await
            .unwrap();

        assert_eq!(statuses[0].status, ServiceStatus::Error);
        let reason = statuses[0].reason.clone().unwrap();
        assert!(reason.contains("worker-1"), "{reason}");
        assert!(reason.contains("[code 2]"), "{reason}");
        assert!(reason.contains("tool first"), "{reason}");
        assert_eq!(statuses[1], ToolInstallStatus::ok("second", ServiceStatus::Installed));
        assert_eq!(remote.count("unreached"), 0);
        assert_eq!(remote.count("fine"), 1);
    }

    #[tokio::test]
    async fn unknown_step_output_is_an_error() {
        let tools = vec![tool("x", vec![step("a", InvocationType::Ssh, "use #STEP_OUTPUT-nope#")])];
        let remote = Arc::new(ScriptedRunner::default());
        let statuses = installer(tools, Arc::new(ScriptedRunner::default()), remote.clone())
            .install_new_node(&mut worker())
            .await
            .unwrap();
        assert_eq!(statuses[0].status, ServiceStatus::Error);
        assert!(statuses[0].reason.as_deref().unwrap().contains("nope"));
        assert!(remote.lines().is_empty());
    }

    #[tokio::test]
    async fn new_master_feeds_later_runs() {
        let local = Arc::new(ScriptedRunner::default());
        let echo_master = step("a", InvocationType::Process, "echo #MASTER_HOSTNAME#");
        let tools = vec![tool("x", vec![echo_master])];
        let inst = installer(tools, local.clone(), Arc::new(ScriptedRunner::default()));
        inst.set_master_node_info(&NodeDescription::new("new-master", "root").as_master())
            .await;
        inst.install_new_node(&mut worker()).await.unwrap();
        assert_eq!(local.lines(), vec!["echo new-master"]);
    }
}
