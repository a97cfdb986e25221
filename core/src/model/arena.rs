//! Id-addressed storage for jobs and their task trees.
//!
//! Groups reference children by id and children reference their group by id,
//! so nested groups never form ownership cycles.

use std::collections::HashMap;

use uuid::Uuid;

use super::job::{ExecutionJob, JobSpec, TaskSpec};
use super::status::ExecutionStatus;
use super::task::{ExecutionTask, TaskKind};
use super::{JobId, TaskId};

#[derive(Debug, Default, Clone)]
pub struct TaskArena {
    jobs: HashMap<JobId, ExecutionJob>,
    tasks: HashMap<TaskId, ExecutionTask>,
}

impl TaskArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expands a submission document into a job and its tasks.
    ///
    /// Missing ids are generated. Every created task starts `UNDETERMINED`.
    pub fn insert_spec(&mut self, spec: JobSpec) -> ExecutionJob {
        let job_id = spec.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut job = ExecutionJob::new(job_id.clone(), spec.user);
        job.name = spec.name;
        job.workflow_id = spec.workflow_id;
        job.batch_id = spec.batch_id;
        for task in spec.tasks {
            let id = self.insert_task_spec(&job_id, None, task);
            job.tasks.push(id);
        }
        self.jobs.insert(job_id, job.clone());
        job
    }

    fn insert_task_spec(&mut self, job_id: &str, parent: Option<&str>, spec: TaskSpec) -> TaskId {
        match spec {
            TaskSpec::Component {
                id,
                workflow_node_id,
                component,
                inputs,
            } => {
                let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
                let mut task = ExecutionTask::component(id.clone(), job_id, component);
                task.parent = parent.map(str::to_string);
                task.workflow_node_id = workflow_node_id;
                task.input_parameters = inputs;
                self.tasks.insert(id.clone(), task);
                id
            }
            TaskSpec::Group {
                id,
                workflow_node_id,
                behavior,
                tasks,
            } => {
                let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
                let mut group = ExecutionTask::group(id.clone(), job_id, behavior);
                group.parent = parent.map(str::to_string);
                group.workflow_node_id = workflow_node_id;
                self.tasks.insert(id.clone(), group);
                let children: Vec<TaskId> = tasks
                    .into_iter()
                    .map(|child| self.insert_task_spec(job_id, Some(&id), child))
                    .collect();
                if let Some(TaskKind::Group { children: c, .. }) =
                    self.tasks.get_mut(&id).map(|t| &mut t.kind)
                {
                    *c = children;
                }
                id
            }
        }
    }

    pub fn insert_job(&mut self, job: ExecutionJob) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn insert_task(&mut self, task: ExecutionTask) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Appends `task` to `group`. Returns false when `group` is not a group.
    pub fn add_child(&mut self, group_id: &str, mut task: ExecutionTask) -> bool {
        let Some(TaskKind::Group { children, .. }) =
            self.tasks.get_mut(group_id).map(|g| &mut g.kind)
        else {
            return false;
        };
        children.push(task.id.clone());
        task.parent = Some(group_id.to_string());
        self.tasks.insert(task.id.clone(), task);
        true
    }

    /// Detaches a child from its group and drops it with its own subtree.
    pub fn remove_child(&mut self, group_id: &str, task_id: &str) -> Option<ExecutionTask> {
        if let Some(TaskKind::Group { children, .. }) =
            self.tasks.get_mut(group_id).map(|g| &mut g.kind)
        {
            children.retain(|c| c != task_id);
        }
        for id in self.descendants(task_id) {
            self.tasks.remove(&id);
        }
        self.tasks.remove(task_id)
    }

    pub fn job(&self, id: &str) -> Option<&ExecutionJob> {
        self.jobs.get(id)
    }

    pub fn job_mut(&mut self, id: &str) -> Option<&mut ExecutionJob> {
        self.jobs.get_mut(id)
    }

    pub fn task(&self, id: &str) -> Option<&ExecutionTask> {
        self.tasks.get(id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut ExecutionTask> {
        self.tasks.get_mut(id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &ExecutionJob> {
        self.jobs.values()
    }

    pub fn children(&self, id: &str) -> Vec<&ExecutionTask> {
        self.tasks
            .get(id)
            .map(|t| t.children())
            .unwrap_or_default()
            .iter()
            .filter_map(|c| self.tasks.get(c))
            .collect()
    }

    pub fn child_statuses(&self, id: &str) -> Vec<ExecutionStatus> {
        self.children(id).iter().map(|t| t.status).collect()
    }

    pub fn top_level_statuses(&self, job_id: &str) -> Vec<ExecutionStatus> {
        self.jobs
            .get(job_id)
            .map(|j| {
                j.tasks
                    .iter()
                    .filter_map(|t| self.tasks.get(t).map(|t| t.status))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn find_by_workflow_node(&self, group_id: &str, node_id: &str) -> Option<&ExecutionTask> {
        self.children(group_id)
            .into_iter()
            .find(|t| t.workflow_node_id.as_deref() == Some(node_id))
    }

    /// All tasks below `id`, depth first, excluding `id` itself.
    pub fn descendants(&self, id: &str) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut stack: Vec<TaskId> = self
            .tasks
            .get(id)
            .map(|t| t.children().iter().rev().cloned().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if let Some(task) = self.tasks.get(&next) {
                stack.extend(task.children().iter().rev().cloned());
            }
            out.push(next);
        }
        out
    }

    /// Every task of a job, top-level tasks included.
    pub fn job_task_ids(&self, job_id: &str) -> Vec<TaskId> {
        let Some(job) = self.jobs.get(job_id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for top in &job.tasks {
            out.push(top.clone());
            out.extend(self.descendants(top));
        }
        out
    }

    /// Drops a job and all of its tasks.
    pub fn remove_job(&mut self, job_id: &str) -> Option<ExecutionJob> {
        for id in self.job_task_ids(job_id) {
            self.tasks.remove(&id);
        }
        self.jobs.remove(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProcessingComponent, TransitionBehavior};

    fn leaf(id: &str) -> TaskSpec {
        TaskSpec::Component {
            id: Some(id.into()),
            workflow_node_id: Some(format!("node-{id}")),
            component: ProcessingComponent::new("gdal", "gdalinfo x.tif"),
            inputs: Default::default(),
        }
    }

    fn nested_spec() -> JobSpec {
        JobSpec {
            id: Some("job-1".into()),
            user: "alice".into(),
            name: "ndvi".into(),
            workflow_id: None,
            batch_id: None,
            tasks: vec![
                leaf("a"),
                TaskSpec::Group {
                    id: Some("g".into()),
                    workflow_node_id: None,
                    behavior: TransitionBehavior::FailOnError,
                    tasks: vec![
                        leaf("b"),
                        TaskSpec::Group {
                            id: Some("g2".into()),
                            workflow_node_id: None,
                            behavior: TransitionBehavior::ContinueOnError,
                            tasks: vec![leaf("c")],
                        },
                    ],
                },
            ],
        }
    }

    #[test]
    fn spec_expansion_links_parents_and_children_by_id() {
        let mut arena = TaskArena::new();
        let job = arena.insert_spec(nested_spec());
        assert_eq!(job.tasks, vec!["a".to_string(), "g".to_string()]);
        assert_eq!(arena.task("b").unwrap().parent.as_deref(), Some("g"));
        assert_eq!(arena.task("c").unwrap().parent.as_deref(), Some("g2"));
        assert_eq!(arena.descendants("g"), vec!["b", "g2", "c"]);
        assert_eq!(arena.job_task_ids("job-1").len(), 5);
        assert_eq!(arena.find_by_workflow_node("g", "node-b").unwrap().id, "b");
    }

    #[test]
    fn removing_a_child_drops_its_subtree() {
        let mut arena = TaskArena::new();
        arena.insert_spec(nested_spec());
        arena.remove_child("g", "g2");
        assert!(arena.task("c").is_none());
        assert_eq!(arena.task("g").unwrap().children(), ["b".to_string()]);
        arena.remove_job("job-1");
        assert!(arena.task("a").is_none());
        assert!(arena.job("job-1").is_none());
    }
}
