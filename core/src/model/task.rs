use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::component::ProcessingComponent;
use super::status::{ExecutionStatus, TransitionBehavior};
use super::{JobId, TaskId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_seconds: f64,
    pub peak_memory_mb: u64,
}

impl ResourceUsage {
    pub fn accumulate(&mut self, other: &ResourceUsage) {
        self.cpu_seconds += other.cpu_seconds;
        self.peak_memory_mb = self.peak_memory_mb.max(other.peak_memory_mb);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    Component {
        component: ProcessingComponent,
    },
    Group {
        #[serde(default)]
        behavior: TransitionBehavior,
        #[serde(default)]
        children: Vec<TaskId>,
    },
}

/// A dispatchable unit of work, or a group aggregating other tasks.
///
/// Parent/child links are ids into a [`super::TaskArena`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub id: TaskId,
    pub job_id: JobId,
    #[serde(default)]
    pub parent: Option<TaskId>,
    #[serde(default)]
    pub workflow_node_id: Option<String>,
    pub kind: TaskKind,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub execution_node_host: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub input_parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub internal_state: Option<String>,
    #[serde(default)]
    pub usage: ResourceUsage,
}

impl ExecutionTask {
    pub fn component(
        id: impl Into<TaskId>,
        job_id: impl Into<JobId>,
        component: ProcessingComponent,
    ) -> Self {
        Self::with_kind(id.into(), job_id.into(), TaskKind::Component { component })
    }

    pub fn group(
        id: impl Into<TaskId>,
        job_id: impl Into<JobId>,
        behavior: TransitionBehavior,
    ) -> Self {
        Self::with_kind(
            id.into(),
            job_id.into(),
            TaskKind::Group {
                behavior,
                children: Vec::new(),
            },
        )
    }

    fn with_kind(id: TaskId, job_id: JobId, kind: TaskKind) -> Self {
        Self {
            id,
            job_id,
            parent: None,
            workflow_node_id: None,
            kind,
            status: ExecutionStatus::Undetermined,
            backend: None,
            resource_id: None,
            execution_node_host: None,
            start_time: None,
            end_time: None,
            failure_reason: None,
            input_parameters: BTreeMap::new(),
            internal_state: None,
            usage: ResourceUsage::default(),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, TaskKind::Group { .. })
    }

    pub fn processing_component(&self) -> Option<&ProcessingComponent> {
        match &self.kind {
            TaskKind::Component { component } => Some(component),
            TaskKind::Group { .. } => None,
        }
    }

    pub fn behavior(&self) -> Option<TransitionBehavior> {
        match &self.kind {
            TaskKind::Group { behavior, .. } => Some(*behavior),
            TaskKind::Component { .. } => None,
        }
    }

    pub fn children(&self) -> &[TaskId] {
        match &self.kind {
            TaskKind::Group { children, .. } => children,
            TaskKind::Component { .. } => &[],
        }
    }
}
