use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use super::images::{list_images_command, parse_images, DockerImage};
use super::installer::Installer;
use crate::error::{TopologyError, TopologyOp};
use crate::model::{NodeDescription, NodeRole, ToolInstallStatus};
use crate::persistence::Persistence;
use crate::runner::{run_command, CollectingConsumer, CommandRunner, CommandSpec};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopologyEvent {
    NodeAdded { hostname: String },
    NodeRemoved { hostname: String },
    NodeUpdated { hostname: String },
    MasterChanged { hostname: String },
    ToolInstall { hostname: String, status: ToolInstallStatus },
}

/// Owner of the node set.
///
/// There is always exactly one master. Installer runs work on a copy of the
/// node and never hold the registry lock, so readers are not blocked by
/// in-flight installs.
pub struct TopologyManager {
    nodes: RwLock<BTreeMap<String, NodeDescription>>,
    master: RwLock<String>,
    installers: Vec<Arc<dyn Installer>>,
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn Persistence>,
    event_tx: broadcast::Sender<TopologyEvent>,
}

impl TopologyManager {
    pub fn new(
        master: NodeDescription,
        installers: Vec<Arc<dyn Installer>>,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn Persistence>,
    ) -> Self {
        let master = master.as_master();
        let (event_tx, _) = broadcast::channel(256);
        let mut nodes = BTreeMap::new();
        let master_host = master.hostname.clone();
        nodes.insert(master_host.clone(), master);
        Self {
            nodes: RwLock::new(nodes),
            master: RwLock::new(master_host),
            installers,
            runner,
            store,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: TopologyEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Loads persisted worker records and hands the master to every installer.
    pub async fn initialize(&self) -> Result<usize, TopologyError> {
        let master = self.master_node().await;
        for installer in &self.installers {
            installer.set_master_node_info(&master).await;
        }
        let stored = self
            .store
            .list_nodes()
            .await
            .map_err(|e| {
                TopologyError::new(TopologyOp::Register, &master.hostname, e.to_string())
            })?;
        let mut nodes = self.nodes.write().await;
        let mut loaded = 0;
        for mut node in stored {
            if node.hostname == master.hostname {
                continue;
            }
            node.role = NodeRole::Worker;
            nodes.insert(node.hostname.clone(), node);
            loaded += 1;
        }
        tracing::info!(master = %master.hostname, workers = loaded, "topology loaded");
        Ok(loaded)
    }

    /// Registers known workers as they are, without running installers.
    pub async fn seed(&self, workers: Vec<NodeDescription>) -> Result<(), TopologyError> {
        let master = self.master.read().await.clone();
        for mut node in workers {
            if node.hostname == master {
                continue;
            }
            node.role = NodeRole::Worker;
            self.save(TopologyOp::Register, &node).await?;
            self.nodes.write().await.insert(node.hostname.clone(), node);
        }
        Ok(())
    }

    pub async fn master_node(&self) -> NodeDescription {
        let host = self.master.read().await.clone();
        let nodes = self.nodes.read().await;
        match nodes.get(&host) {
            Some(node) => node.clone(),
            None => NodeDescription::new(host, String::new()).as_master(),
        }
    }

    /// Registers (or re-registers) a worker and runs every installer on it.
    ///
    /// Installer failures come back as `Error` statuses; the node stays
    /// registered.
    pub async fn add(
        &self,
        node: NodeDescription,
    ) -> Result<Vec<ToolInstallStatus>, TopologyError> {
        if node.is_master() || *self.master.read().await == node.hostname {
            return Err(TopologyError::new(
                TopologyOp::Register,
                &node.hostname,
                "the master is replaced through set_master_node_info",
            ));
        }
        let mut node = node;
        node.role = NodeRole::Worker;
        self.save(TopologyOp::Register, &node).await?;
        self.nodes.write().await.insert(node.hostname.clone(), node.clone());
        tracing::info!(host = %node.hostname, "node registered");
        self.emit(TopologyEvent::NodeAdded {
            hostname: node.hostname.clone(),
        });

        let mut statuses = Vec::new();
        for installer in &self.installers {
            let result = installer.install_new_node(&mut node).await;
            statuses.extend(self.collect(&node.hostname, installer.name(), result));
        }

        self.save(TopologyOp::Install, &node).await?;
        self.nodes.write().await.insert(node.hostname.clone(), node);
        Ok(statuses)
    }

    /// Removes a worker and uninstalls its tools. The master cannot be removed.
    pub async fn remove(&self, hostname: &str) -> Result<Vec<ToolInstallStatus>, TopologyError> {
        if *self.master.read().await == hostname {
            return Err(TopologyError::new(
                TopologyOp::Remove,
                hostname,
                "the master node cannot be removed",
            ));
        }
        let mut node = self
            .nodes
            .write()
            .await
            .remove(hostname)
            .ok_or_else(|| TopologyError::new(TopologyOp::Remove, hostname, "unknown node"))?;
        self.store
            .delete_node(hostname)
            .await
            .map_err(|e| TopologyError::new(TopologyOp::Remove, hostname, e.to_string()))?;
        tracing::info!(host = hostname, "node removed");
        self.emit(TopologyEvent::NodeRemoved {
            hostname: hostname.to_string(),
        });

        let mut statuses = Vec::new();
        for installer in &self.installers {
            let result = installer.uninstall_node(&mut node).await;
            statuses.extend(self.collect(hostname, installer.name(), result));
        }
        Ok(statuses)
    }

    /// Replaces a node record. The role is kept as registered.
    pub async fn update(&self, node: NodeDescription) -> Result<(), TopologyError> {
        let mut node = node;
        {
            let nodes = self.nodes.read().await;
            let current = nodes.get(&node.hostname).ok_or_else(|| {
                TopologyError::new(TopologyOp::Update, &node.hostname, "unknown node")
            })?;
            node.role = current.role;
        }
        for installer in &self.installers {
            installer.edit_node(&mut node).await?;
        }
        self.save(TopologyOp::Update, &node).await?;
        let hostname = node.hostname.clone();
        let is_master = node.is_master();
        self.nodes.write().await.insert(hostname.clone(), node.clone());
        if is_master {
            self.forward_master(&node).await;
        }
        self.emit(TopologyEvent::NodeUpdated { hostname });
        Ok(())
    }

    /// Replaces the master record. A worker with the same hostname is
    /// promoted; the previous master record is dropped.
    pub async fn set_master_node_info(&self, node: NodeDescription) -> Result<(), TopologyError> {
        let node = node.as_master();
        self.save(TopologyOp::Update, &node).await?;
        {
            let mut master = self.master.write().await;
            let mut nodes = self.nodes.write().await;
            if *master != node.hostname {
                nodes.remove(master.as_str());
                if let Err(e) = self.store.delete_node(master.as_str()).await {
                    tracing::warn!(
                        host = %master,
                        error = %e,
                        "could not delete previous master record"
                    );
                }
            }
            *master = node.hostname.clone();
            nodes.insert(node.hostname.clone(), node.clone());
        }
        self.forward_master(&node).await;
        tracing::info!(host = %node.hostname, "master node set");
        self.emit(TopologyEvent::MasterChanged {
            hostname: node.hostname,
        });
        Ok(())
    }

    /// Active nodes, master included.
    pub async fn list(&self) -> Vec<NodeDescription> {
        self.nodes
            .read()
            .await
            .values()
            .filter(|n| n.active)
            .cloned()
            .collect()
    }

    pub async fn get(&self, hostname: &str) -> Option<NodeDescription> {
        self.nodes.read().await.get(hostname).cloned()
    }

    /// Probes every node and records whether it answered.
    pub async fn check_reachability(&self) -> Vec<(String, bool)> {
        let snapshot: Vec<NodeDescription> = self.nodes.read().await.values().cloned().collect();
        let mut results = Vec::with_capacity(snapshot.len());
        for node in snapshot {
            let reachable = self
                .runner
                .can_connect(node.address(), &node.user, node.password.as_deref())
                .await;
            if !reachable {
                tracing::warn!(host = %node.hostname, "node unreachable");
            }
            if let Some(stored) = self.nodes.write().await.get_mut(&node.hostname) {
                stored.reachable = Some(reachable);
            }
            results.push((node.hostname, reachable));
        }
        results
    }

    /// Images available to the container runtime on the master.
    pub async fn available_docker_images(&self) -> Result<Vec<DockerImage>, TopologyError> {
        let master = self.master_node().await;
        let spec = CommandSpec::new(master.address(), &master.user, list_images_command())
            .with_password(master.password.clone());
        let mut out = CollectingConsumer::default();
        let outcome = run_command(
            self.runner.as_ref(),
            &spec,
            &mut out,
            tokio_util::sync::CancellationToken::new(),
        )
        .await
        .map_err(|e| TopologyError::new(TopologyOp::ListImages, &master.hostname, e.to_string()))?;
        if outcome.exit_code != 0 {
            return Err(
                TopologyError::new(TopologyOp::ListImages, &master.hostname, "docker images failed")
                    .with_exit_code(outcome.exit_code),
            );
        }
        Ok(parse_images(out.lines.iter().map(String::as_str)))
    }

    async fn forward_master(&self, master: &NodeDescription) {
        for installer in &self.installers {
            installer.set_master_node_info(master).await;
        }
    }

    async fn save(&self, op: TopologyOp, node: &NodeDescription) -> Result<(), TopologyError> {
        self.store
            .save_node(node)
            .await
            .map_err(|e| TopologyError::new(op, &node.hostname, e.to_string()))
    }

    fn collect(
        &self,
        hostname: &str,
        installer: &str,
        result: Result<Vec<ToolInstallStatus>, TopologyError>,
    ) -> Vec<ToolInstallStatus> {
        let statuses = match result {
            Ok(statuses) => statuses,
            Err(e) => {
                tracing::warn!(host = hostname, installer, error = %e, "installer failed");
                let tool = e.tool.clone().unwrap_or_else(|| installer.to_string());
                vec![ToolInstallStatus::error(tool, e.to_string())]
            }
        };
        for status in &statuses {
            self.emit(TopologyEvent::ToolInstall {
                hostname: hostname.to_string(),
                status: status.clone(),
            });
        }
        statuses
    }
}
