use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::component::ProcessingComponent;
use super::status::{ExecutionStatus, TransitionBehavior};
use super::{JobId, TaskId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub id: JobId,
    pub user_id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    /// Top-level tasks in submission order.
    pub tasks: Vec<TaskId>,
    pub status: ExecutionStatus,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl ExecutionJob {
    pub fn new(id: impl Into<JobId>, user_id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            name: String::new(),
            workflow_id: None,
            batch_id: None,
            tasks: Vec::new(),
            status: ExecutionStatus::Undetermined,
            created: Utc::now(),
            start_time: None,
            end_time: None,
        }
    }
}

/// Submission document: a job with its task tree, before ids are assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub id: Option<JobId>,
    pub user: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSpec {
    Component {
        #[serde(default)]
        id: Option<TaskId>,
        #[serde(default)]
        workflow_node_id: Option<String>,
        component: ProcessingComponent,
        #[serde(default)]
        inputs: BTreeMap<String, String>,
    },
    Group {
        #[serde(default)]
        id: Option<TaskId>,
        #[serde(default)]
        workflow_node_id: Option<String>,
        #[serde(default)]
        behavior: TransitionBehavior,
        tasks: Vec<TaskSpec>,
    },
}

impl JobSpec {
    pub fn new(user: impl Into<UserId>, tasks: Vec<TaskSpec>) -> Self {
        Self {
            id: None,
            user: user.into(),
            name: String::new(),
            workflow_id: None,
            batch_id: None,
            tasks,
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl TaskSpec {
    pub fn component(component: ProcessingComponent) -> Self {
        TaskSpec::Component {
            id: None,
            workflow_node_id: None,
            component,
            inputs: BTreeMap::new(),
        }
    }

    pub fn group(behavior: TransitionBehavior, tasks: Vec<TaskSpec>) -> Self {
        TaskSpec::Group {
            id: None,
            workflow_node_id: None,
            behavior,
            tasks,
        }
    }

    /// Input parameter for a component task; ignored on groups.
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TaskSpec::Component { inputs, .. } = &mut self {
            inputs.insert(key.into(), value.into());
        }
        self
    }
}
