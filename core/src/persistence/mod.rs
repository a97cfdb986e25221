//! Contract of the durable store that owns job, task and node records.
//!
//! The store is authoritative over process memory: the queue and the state
//! manager are views rebuilt from it after a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ExecError;
use crate::model::{ExecutionJob, ExecutionStatus, ExecutionTask, NodeDescription};

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_job(&self, job: &ExecutionJob) -> Result<(), ExecError>;
    async fn save_task(&self, task: &ExecutionTask) -> Result<(), ExecError>;
    async fn update_status(
        &self,
        task_id: &str,
        status: ExecutionStatus,
        reason: Option<&str>,
    ) -> Result<(), ExecError>;
    async fn get_job(&self, job_id: &str) -> Result<Option<ExecutionJob>, ExecError>;
    async fn get_tasks(&self, job_id: &str) -> Result<Vec<ExecutionTask>, ExecError>;
    /// Jobs whose status is one of `statuses`.
    async fn list_jobs(&self, statuses: &[ExecutionStatus])
        -> Result<Vec<ExecutionJob>, ExecError>;
    async fn list_running(&self) -> Result<Vec<ExecutionTask>, ExecError>;
    async fn get_by_resource_id(&self, resource_id: &str)
        -> Result<Option<ExecutionTask>, ExecError>;
    async fn save_node(&self, node: &NodeDescription) -> Result<(), ExecError>;
    async fn delete_node(&self, hostname: &str) -> Result<(), ExecError>;
    async fn list_nodes(&self) -> Result<Vec<NodeDescription>, ExecError>;
}

/// Process-local store used by the CLI and by tests.
#[derive(Default)]
pub struct InMemoryPersistence {
    jobs: RwLock<HashMap<String, ExecutionJob>>,
    tasks: RwLock<HashMap<String, ExecutionTask>>,
    nodes: RwLock<HashMap<String, NodeDescription>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn save_job(&self, job: &ExecutionJob) -> Result<(), ExecError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn save_task(&self, task: &ExecutionTask) -> Result<(), ExecError> {
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        task_id: &str,
        status: ExecutionStatus,
        reason: Option<&str>,
    ) -> Result<(), ExecError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| ExecError::Persistence(format!("unknown task {task_id}")))?;
        task.status = status;
        if let Some(reason) = reason {
            task.failure_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<ExecutionJob>, ExecError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn get_tasks(&self, job_id: &str) -> Result<Vec<ExecutionTask>, ExecError> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn list_jobs(
        &self,
        statuses: &[ExecutionStatus],
    ) -> Result<Vec<ExecutionJob>, ExecError> {
        let mut jobs: Vec<ExecutionJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created);
        Ok(jobs)
    }

    async fn list_running(&self) -> Result<Vec<ExecutionTask>, ExecError> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == ExecutionStatus::Running)
            .cloned()
            .collect())
    }

    async fn get_by_resource_id(
        &self,
        resource_id: &str,
    ) -> Result<Option<ExecutionTask>, ExecError> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .find(|t| t.resource_id.as_deref() == Some(resource_id))
            .cloned())
    }

    async fn save_node(&self, node: &NodeDescription) -> Result<(), ExecError> {
        self.nodes
            .write()
            .await
            .insert(node.hostname.clone(), node.clone());
        Ok(())
    }

    async fn delete_node(&self, hostname: &str) -> Result<(), ExecError> {
        self.nodes.write().await.remove(hostname);
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeDescription>, ExecError> {
        Ok(self.nodes.read().await.values().cloned().collect())
    }
}
