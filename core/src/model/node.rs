use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    #[default]
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Installed,
    Uninstalled,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeServiceStatus {
    pub service: String,
    #[serde(default)]
    pub version: Option<String>,
    pub status: ServiceStatus,
}

/// Outcome of one installer run against one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInstallStatus {
    pub tool_name: String,
    pub status: ServiceStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ToolInstallStatus {
    pub fn ok(tool: impl Into<String>, status: ServiceStatus) -> Self {
        Self {
            tool_name: tool.into(),
            status,
            reason: None,
        }
    }

    pub fn error(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tool_name: tool.into(),
            status: ServiceStatus::Error,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub hostname: String,
    #[serde(default)]
    pub ip: Option<String>,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default = "default_processors")]
    pub processors: u32,
    #[serde(default)]
    pub memory_gb: u32,
    #[serde(default)]
    pub disk_gb: u32,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Outcome of the last reachability probe; `None` until probed.
    #[serde(default)]
    pub reachable: Option<bool>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub services: Vec<NodeServiceStatus>,
}

fn default_processors() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

impl NodeDescription {
    pub fn new(hostname: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip: None,
            user: user.into(),
            password: None,
            role: NodeRole::Worker,
            processors: default_processors(),
            memory_gb: 0,
            disk_gb: 0,
            active: default_active(),
            reachable: None,
            description: String::new(),
            services: Vec::new(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn as_master(mut self) -> Self {
        self.role = NodeRole::Master;
        self
    }

    /// Address used to reach the node: the IP when known, else the hostname.
    pub fn address(&self) -> &str {
        self.ip.as_deref().unwrap_or(&self.hostname)
    }

    /// True only when the last probe failed.
    pub fn known_unreachable(&self) -> bool {
        self.reachable == Some(false)
    }

    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }

    /// Records a service status, replacing any previous entry for the service.
    pub fn set_service_status(&mut self, status: NodeServiceStatus) {
        self.services.retain(|s| s.service != status.service);
        self.services.push(status);
    }
}

impl fmt::Debug for NodeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDescription")
            .field("hostname", &self.hostname)
            .field("ip", &self.ip)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("role", &self.role)
            .field("processors", &self.processors)
            .field("active", &self.active)
            .field("reachable", &self.reachable)
            .finish()
    }
}
