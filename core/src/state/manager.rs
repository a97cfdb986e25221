use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};

use super::transitions::StateTransition;
use super::types::ExecutionEvent;
use crate::error::ExecError;
use crate::model::{
    ExecutionJob, ExecutionStatus, ExecutionTask, JobSpec, ResourceUsage, TaskArena, TaskId,
    TransitionBehavior,
};
use crate::persistence::Persistence;

/// Owner of the in-memory task arena.
///
/// Every mutation runs under the arena write lock, so transitions of one task
/// are linearizable and a job status is always recomputed from a consistent
/// view of all its tasks.
#[derive(Clone)]
pub struct ExecutionStateManager {
    inner: Arc<StateManagerInner>,
}

struct StateManagerInner {
    arena: RwLock<TaskArena>,
    store: Arc<dyn Persistence>,
    event_tx: broadcast::Sender<ExecutionEvent>,
}

/// One record changed under the arena lock, with its previous image.
enum Change {
    Task {
        task: ExecutionTask,
        before: ExecutionTask,
    },
    Job {
        job: ExecutionJob,
        before: ExecutionJob,
    },
}

impl Change {
    fn restore(&self, arena: &mut TaskArena) {
        match self {
            Change::Task { before, .. } => {
                if let Some(task) = arena.task_mut(&before.id) {
                    *task = before.clone();
                }
            }
            Change::Job { before, .. } => {
                if let Some(job) = arena.job_mut(&before.id) {
                    *job = before.clone();
                }
            }
        }
    }

    async fn save(&self, store: &dyn Persistence) -> Result<(), ExecError> {
        match self {
            Change::Task { task, .. } => store.save_task(task).await,
            Change::Job { job, .. } => store.save_job(job).await,
        }
    }

    async fn save_before(&self, store: &dyn Persistence) -> Result<(), ExecError> {
        match self {
            Change::Task { before, .. } => store.save_task(before).await,
            Change::Job { before, .. } => store.save_job(before).await,
        }
    }
}

impl ExecutionStateManager {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            inner: Arc::new(StateManagerInner {
                arena: RwLock::new(TaskArena::new()),
                store,
                event_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn store(&self) -> Arc<dyn Persistence> {
        self.inner.store.clone()
    }

    fn emit(&self, event: ExecutionEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    /// Expands and persists a submitted job.
    pub async fn register_job(&self, spec: JobSpec) -> Result<ExecutionJob, ExecError> {
        let mut arena = self.inner.arena.write().await;
        if let Some(id) = spec.id.as_deref() {
            if arena.job(id).is_some() {
                return Err(ExecError::QueueState(format!("job {id} already registered")));
            }
        }
        let job = arena.insert_spec(spec);
        let task_ids = arena.job_task_ids(&job.id);
        let saved = async {
            self.inner.store.save_job(&job).await?;
            for id in &task_ids {
                if let Some(task) = arena.task(id) {
                    self.inner.store.save_task(task).await?;
                }
            }
            Ok::<_, ExecError>(())
        }
        .await;
        if let Err(e) = saved {
            arena.remove_job(&job.id);
            return Err(e);
        }
        drop(arena);

        tracing::info!(
            job_id = %job.id,
            user = %job.user_id,
            tasks = task_ids.len(),
            "job registered"
        );
        self.emit(ExecutionEvent::JobSubmitted {
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            task_count: task_ids.len(),
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    /// Loads a persisted job and its tasks back into memory.
    pub async fn restore_job(&self, job_id: &str) -> Result<ExecutionJob, ExecError> {
        let job = self
            .inner
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ExecError::Persistence(format!("unknown job {job_id}")))?;
        let tasks = self.inner.store.get_tasks(job_id).await?;
        let mut arena = self.inner.arena.write().await;
        for task in tasks {
            arena.insert_task(task);
        }
        arena.insert_job(job.clone());
        Ok(job)
    }

    /// Drops a finished job from memory; the store keeps the record.
    pub async fn forget_job(&self, job_id: &str) {
        self.inner.arena.write().await.remove_job(job_id);
    }

    pub async fn job(&self, job_id: &str) -> Option<ExecutionJob> {
        self.inner.arena.read().await.job(job_id).cloned()
    }

    pub async fn task(&self, task_id: &str) -> Option<ExecutionTask> {
        self.inner.arena.read().await.task(task_id).cloned()
    }

    pub async fn job_tasks(&self, job_id: &str) -> Vec<ExecutionTask> {
        let arena = self.inner.arena.read().await;
        arena
            .job_task_ids(job_id)
            .iter()
            .filter_map(|id| arena.task(id).cloned())
            .collect()
    }

    /// Runs `f` against a read-only view of the arena.
    pub async fn read<R>(&self, f: impl FnOnce(&TaskArena) -> R) -> R {
        let arena = self.inner.arena.read().await;
        f(&arena)
    }

    /// Tasks currently bound to `backend` whose status is one of `statuses`.
    pub async fn tasks_for_backend(
        &self,
        backend: &str,
        statuses: &[ExecutionStatus],
    ) -> Vec<ExecutionTask> {
        let arena = self.inner.arena.read().await;
        arena
            .jobs()
            .flat_map(|j| arena.job_task_ids(&j.id))
            .filter_map(|id| arena.task(&id))
            .filter(|t| t.backend.as_deref() == Some(backend) && statuses.contains(&t.status))
            .cloned()
            .collect()
    }

    pub async fn find_by_resource_id(&self, resource_id: &str) -> Option<ExecutionTask> {
        let arena = self.inner.arena.read().await;
        let found = arena
            .jobs()
            .flat_map(|j| arena.job_task_ids(&j.id))
            .filter_map(|id| arena.task(&id))
            .find(|t| t.resource_id.as_deref() == Some(resource_id))
            .cloned();
        found
    }

    /// Marks a job and all of its pending tasks `QUEUED_ACTIVE`.
    pub async fn mark_job_queued(&self, job_id: &str) -> Result<(), ExecError> {
        let mut changes = Vec::new();
        {
            let mut arena = self.inner.arena.write().await;
            let ids = arena.job_task_ids(job_id);
            if arena.job(job_id).is_none() {
                return Err(ExecError::QueueState(format!("unknown job {job_id}")));
            }
            for id in ids {
                if let Some(task) = arena.task_mut(&id) {
                    if task.status == ExecutionStatus::Undetermined {
                        let before = task.clone();
                        task.status = ExecutionStatus::QueuedActive;
                        changes.push(Change::Task {
                            task: task.clone(),
                            before,
                        });
                    }
                }
            }
            recompute_job(&mut arena, job_id, &mut changes);
            self.commit(&mut arena, &changes).await?;
        }
        self.publish(changes);
        Ok(())
    }

    /// Records which backend accepted a task and the handle it assigned.
    pub async fn assign_resource(
        &self,
        task_id: &str,
        backend: &str,
        resource_id: &str,
        host: Option<&str>,
    ) -> Result<(), ExecError> {
        self.update_task(task_id, |task| {
            task.backend = Some(backend.to_string());
            task.resource_id = Some(resource_id.to_string());
            task.execution_node_host = host.map(str::to_string);
        })
        .await
    }

    /// Moves a task to `to`, then re-reduces its ancestors and its job.
    ///
    /// Returns `false` when the task already had that status. Calling this on a
    /// group applies an explicit group status change.
    pub async fn transition(
        &self,
        task_id: &str,
        to: ExecutionStatus,
        reason: Option<String>,
    ) -> Result<bool, ExecError> {
        let mut changes = Vec::new();
        {
            let mut arena = self.inner.arena.write().await;
            let task = arena
                .task(task_id)
                .ok_or_else(|| ExecError::Execution(format!("unknown task {task_id}")))?;
            if task.status == to {
                return Ok(false);
            }
            if task.is_group() {
                change_group(&mut arena, task_id, to, &mut changes)?;
            } else {
                StateTransition::validate(task.status, to)?;
                set_status(&mut arena, task_id, to, reason, &mut changes);
            }
            propagate_up(&mut arena, task_id, &mut changes);
            self.commit(&mut arena, &changes).await?;
        }
        self.publish(changes);
        Ok(true)
    }

    /// Cancels every non-terminal task of a job and returns the leaf tasks that
    /// had been handed to a backend, so the caller can ask it to stop them.
    pub async fn cancel_job(&self, job_id: &str) -> Result<Vec<ExecutionTask>, ExecError> {
        let mut changes = Vec::new();
        let mut dispatched = Vec::new();
        {
            let mut arena = self.inner.arena.write().await;
            if arena.job(job_id).is_none() {
                return Err(ExecError::QueueState(format!("unknown job {job_id}")));
            }
            for id in arena.job_task_ids(job_id) {
                let Some(task) = arena.task(&id) else {
                    continue;
                };
                if task.is_group() || task.status.is_terminal() {
                    continue;
                }
                if task.resource_id.is_some() {
                    dispatched.push(task.clone());
                }
                set_status(
                    &mut arena,
                    &id,
                    ExecutionStatus::Cancelled,
                    Some("cancelled by user".to_string()),
                    &mut changes,
                );
            }
            let tops = arena.job(job_id).map(|j| j.tasks.clone()).unwrap_or_default();
            for top in tops {
                reduce_subtree(&mut arena, &top, &mut changes);
            }
            recompute_job(&mut arena, job_id, &mut changes);
            self.commit(&mut arena, &changes).await?;
        }
        self.publish(changes);
        Ok(dispatched)
    }

    pub async fn report_progress(&self, task_id: &str, percent: f32) {
        let job_id = match self.inner.arena.read().await.task(task_id) {
            Some(t) => t.job_id.clone(),
            None => return,
        };
        self.emit(ExecutionEvent::TaskProgress {
            job_id,
            task_id: task_id.to_string(),
            percent: percent.clamp(0.0, 100.0),
            timestamp: Utc::now(),
        });
    }

    /// Publishes a progress event without touching the arena; callable from
    /// synchronous line consumers.
    pub fn publish_progress(&self, job_id: &str, task_id: &str, percent: f32) {
        self.emit(ExecutionEvent::TaskProgress {
            job_id: job_id.to_string(),
            task_id: task_id.to_string(),
            percent: percent.clamp(0.0, 100.0),
            timestamp: Utc::now(),
        });
    }

    pub async fn add_usage(&self, task_id: &str, usage: &ResourceUsage) -> Result<(), ExecError> {
        if self.task(task_id).await.is_none() {
            return Ok(());
        }
        self.update_task(task_id, |task| task.usage.accumulate(usage)).await
    }

    pub async fn set_internal_state(
        &self,
        task_id: &str,
        state: Option<String>,
    ) -> Result<(), ExecError> {
        if self.task(task_id).await.is_none() {
            return Ok(());
        }
        self.update_task(task_id, |task| task.internal_state = state).await
    }

    /// Applies `edit` to a copy of the task, stores the copy and only then
    /// swaps it into the arena.
    async fn update_task(
        &self,
        task_id: &str,
        edit: impl FnOnce(&mut ExecutionTask),
    ) -> Result<(), ExecError> {
        let mut arena = self.inner.arena.write().await;
        let mut updated = arena
            .task(task_id)
            .cloned()
            .ok_or_else(|| ExecError::Execution(format!("unknown task {task_id}")))?;
        edit(&mut updated);
        self.inner.store.save_task(&updated).await?;
        if let Some(task) = arena.task_mut(task_id) {
            *task = updated;
        }
        Ok(())
    }

    /// Stores `changes` in order. When the store refuses one, the arena and
    /// the records already written go back to their previous images, so memory
    /// and store agree and nothing is published.
    async fn commit(&self, arena: &mut TaskArena, changes: &[Change]) -> Result<(), ExecError> {
        let store = self.inner.store.as_ref();
        for (written, change) in changes.iter().enumerate() {
            let Err(e) = change.save(store).await else {
                continue;
            };
            for change in changes.iter().rev() {
                change.restore(arena);
            }
            for change in changes[..written].iter().rev() {
                if let Err(undo) = change.save_before(store).await {
                    tracing::warn!(error = %undo, "could not restore a stored record");
                }
            }
            tracing::warn!(error = %e, changes = changes.len(), "status change rolled back");
            return Err(e);
        }
        Ok(())
    }

    fn publish(&self, changes: Vec<Change>) {
        let now = Utc::now();
        for change in changes {
            match change {
                Change::Task { task, before } => {
                    let old = before.status;
                    tracing::debug!(
                        job_id = %task.job_id,
                        task_id = %task.id,
                        from = %old,
                        to = %task.status,
                        "task status changed"
                    );
                    self.emit(ExecutionEvent::TaskStatusChanged {
                        job_id: task.job_id,
                        task_id: task.id,
                        old_status: old,
                        new_status: task.status,
                        reason: task.failure_reason,
                        timestamp: now,
                    });
                }
                Change::Job { job, before } => {
                    let old = before.status;
                    tracing::info!(
                        job_id = %job.id,
                        from = %old,
                        to = %job.status,
                        "job status changed"
                    );
                    self.emit(ExecutionEvent::JobStatusChanged {
                        job_id: job.id,
                        user_id: job.user_id,
                        old_status: old,
                        new_status: job.status,
                        timestamp: now,
                    });
                }
            }
        }
    }
}

fn set_status(
    arena: &mut TaskArena,
    task_id: &str,
    to: ExecutionStatus,
    reason: Option<String>,
    changes: &mut Vec<Change>,
) {
    let Some(task) = arena.task_mut(task_id) else {
        return;
    };
    if task.status == to {
        return;
    }
    let before = task.clone();
    task.status = to;
    let now = Utc::now();
    if to == ExecutionStatus::Running && task.start_time.is_none() {
        task.start_time = Some(now);
    }
    if to.is_terminal() {
        task.end_time = Some(now);
    }
    if reason.is_some() {
        task.failure_reason = reason;
    }
    changes.push(Change::Task {
        task: task.clone(),
        before,
    });
}

/// Explicit status change on a group: every child that is not finished takes
/// the same status before the group itself does.
fn change_group(
    arena: &mut TaskArena,
    group_id: &str,
    to: ExecutionStatus,
    changes: &mut Vec<Change>,
) -> Result<(), ExecError> {
    let from = arena
        .task(group_id)
        .map(|t| t.status)
        .unwrap_or(ExecutionStatus::Undetermined);
    StateTransition::validate_reduced(from, to)?;
    for id in arena.descendants(group_id) {
        let Some(child) = arena.task(&id) else {
            continue;
        };
        let ok = if child.is_group() {
            StateTransition::validate_reduced(child.status, to).is_ok()
        } else {
            StateTransition::validate(child.status, to).is_ok()
        };
        if ok {
            set_status(arena, &id, to, None, changes);
        }
    }
    set_status(arena, group_id, to, None, changes);
    Ok(())
}

/// Re-reduces the ancestors of `task_id` bottom-up and then its job.
fn propagate_up(arena: &mut TaskArena, task_id: &str, changes: &mut Vec<Change>) {
    let Some(task) = arena.task(task_id) else {
        return;
    };
    let job_id = task.job_id.clone();
    let mut child_id = task_id.to_string();
    let mut parent = task.parent.clone();

    while let Some(group_id) = parent {
        let child_status = arena
            .task(&child_id)
            .map(|t| t.status)
            .unwrap_or(ExecutionStatus::Undetermined);
        let behavior = arena
            .task(&group_id)
            .and_then(|g| g.behavior())
            .unwrap_or_default();

        if behavior == TransitionBehavior::FailOnError
            && matches!(
                child_status,
                ExecutionStatus::Failed | ExecutionStatus::Cancelled
            )
        {
            skip_later_siblings(arena, &group_id, &child_id, child_status, changes);
        }

        reduce_one(arena, &group_id, changes);
        parent = arena.task(&group_id).and_then(|g| g.parent.clone());
        child_id = group_id;
    }

    recompute_job(arena, &job_id, changes);
}

/// Siblings after a failed or cancelled child that have not started yet take
/// the same status.
fn skip_later_siblings(
    arena: &mut TaskArena,
    group_id: &str,
    child_id: &str,
    status: ExecutionStatus,
    changes: &mut Vec<Change>,
) {
    let siblings: Vec<TaskId> = arena
        .task(group_id)
        .map(|g| g.children().to_vec())
        .unwrap_or_default();
    let Some(pos) = siblings.iter().position(|s| s == child_id) else {
        return;
    };
    let reason = format!("skipped: {child_id} is {status}");
    for sibling in &siblings[pos + 1..] {
        let mut subtree = vec![sibling.clone()];
        subtree.extend(arena.descendants(sibling));
        for id in subtree {
            let pending = arena.task(&id).is_some_and(|t| {
                matches!(
                    t.status,
                    ExecutionStatus::Undetermined | ExecutionStatus::QueuedActive
                )
            });
            if pending {
                set_status(arena, &id, status, Some(reason.clone()), changes);
            }
        }
    }
}

fn reduce_one(arena: &mut TaskArena, group_id: &str, changes: &mut Vec<Change>) {
    let Some(group) = arena.task(group_id) else {
        return;
    };
    let Some(behavior) = group.behavior() else {
        return;
    };
    let current = group.status;
    let next = StateTransition::reduce_group(behavior, &arena.child_statuses(group_id));
    if next != current && StateTransition::validate_reduced(current, next).is_ok() {
        set_status(arena, group_id, next, None, changes);
    }
}

/// Reduces every group below and including `id`, children first.
fn reduce_subtree(arena: &mut TaskArena, id: &str, changes: &mut Vec<Change>) {
    let children: Vec<TaskId> = arena
        .task(id)
        .map(|t| t.children().to_vec())
        .unwrap_or_default();
    for child in children {
        reduce_subtree(arena, &child, changes);
    }
    reduce_one(arena, id, changes);
}

fn recompute_job(arena: &mut TaskArena, job_id: &str, changes: &mut Vec<Change>) {
    let top = arena.top_level_statuses(job_id);
    let settled = arena
        .job_task_ids(job_id)
        .iter()
        .filter_map(|id| arena.task(id))
        .all(|t| t.status.is_terminal());
    let Some(job) = arena.job_mut(job_id) else {
        return;
    };
    let next = StateTransition::reduce_job(&top, settled);
    let old = job.status;
    if next == old || StateTransition::validate_reduced(old, next).is_err() {
        return;
    }
    let before = job.clone();
    job.status = next;
    let now = Utc::now();
    if next == ExecutionStatus::Running && job.start_time.is_none() {
        job.start_time = Some(now);
    }
    if next.is_terminal() {
        job.end_time = Some(now);
    }
    changes.push(Change::Job {
        job: job.clone(),
        before,
    });
}
