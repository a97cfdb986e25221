use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Image reference for components that run inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub image: String,
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Read-only descriptor of what a task runs.
///
/// `backend` is an optional hint; backends decide support through their own
/// predicate and may ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingComponent {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub command_template: String,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub container: Option<ContainerRef>,
    #[serde(default)]
    pub cpus: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub supports_pause: bool,
}

impl ProcessingComponent {
    pub fn new(id: impl Into<String>, command_template: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            command_template: command_template.into(),
            backend: None,
            container: None,
            cpus: None,
            memory_mb: None,
            supports_pause: false,
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_container(mut self, container: ContainerRef) -> Self {
        self.container = Some(container);
        self
    }

    pub fn wants_backend(&self, name: &str) -> bool {
        self.backend.as_deref() == Some(name)
    }
}
