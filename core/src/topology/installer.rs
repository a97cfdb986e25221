use async_trait::async_trait;

use crate::error::TopologyError;
use crate::model::{NodeDescription, ToolInstallStatus};

/// Layers cluster software onto nodes.
///
/// Implementations probe before installing, so installing twice is safe.
/// Service statuses of the tools they handle are recorded on the node.
#[async_trait]
pub trait Installer: Send + Sync {
    fn name(&self) -> &str;

    /// The master is the source of `#MASTER_*#` values and of local steps.
    async fn set_master_node_info(&self, master: &NodeDescription);

    async fn install_new_node(
        &self,
        node: &mut NodeDescription,
    ) -> Result<Vec<ToolInstallStatus>, TopologyError>;

    async fn uninstall_node(
        &self,
        node: &mut NodeDescription,
    ) -> Result<Vec<ToolInstallStatus>, TopologyError>;

    async fn edit_node(&self, _node: &mut NodeDescription) -> Result<(), TopologyError> {
        Ok(())
    }
}
