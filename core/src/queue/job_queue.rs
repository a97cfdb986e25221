use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::selector::{FirstComeSelector, JobSelector};
use crate::error::ExecError;
use crate::model::{ExecutionStatus, JobId, UserId};
use crate::persistence::Persistence;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub user_id: UserId,
}

/// Pending jobs in global arrival order.
///
/// Per-user sub-queues are the global order filtered by owner, so every id is
/// held exactly once and the user views always agree with the global one.
/// The lock is never held across an await point.
pub struct JobQueue {
    entries: Mutex<VecDeque<QueuedJob>>,
    selector: Box<dyn JobSelector>,
    available: Notify,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_selector(Box::new(FirstComeSelector))
    }

    pub fn with_selector(selector: Box<dyn JobSelector>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            selector,
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedJob>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rebuilds the queue from jobs persisted in a non-terminal state.
    ///
    /// Recovered jobs and their unfinished tasks are reset to `UNDETERMINED`
    /// and enqueued by creation time.
    pub async fn initialize(&self, store: &dyn Persistence) -> Result<usize, ExecError> {
        let jobs = store
            .list_jobs(&[
                ExecutionStatus::Undetermined,
                ExecutionStatus::QueuedActive,
                ExecutionStatus::Running,
            ])
            .await?;
        let mut recovered = 0;
        for mut job in jobs {
            job.status = ExecutionStatus::Undetermined;
            job.start_time = None;
            job.end_time = None;
            store.save_job(&job).await?;
            for task in store.get_tasks(&job.id).await? {
                if !task.status.is_terminal() && task.status != ExecutionStatus::Undetermined {
                    store
                        .update_status(&task.id, ExecutionStatus::Undetermined, None)
                        .await?;
                }
            }
            self.put(&job.id, &job.user_id);
            recovered += 1;
        }
        if recovered > 0 {
            tracing::info!(recovered, "job queue restored from persistence");
        }
        Ok(recovered)
    }

    /// Appends a job and returns its 1-based position among the user's jobs.
    ///
    /// Putting an id that is already queued returns its current position.
    pub fn put(&self, job_id: &str, user_id: &str) -> usize {
        let position = {
            let mut entries = self.lock();
            if let Some(existing) = entries.iter().find(|e| e.job_id == job_id) {
                let owner = existing.user_id.clone();
                return user_position(&entries, &owner, job_id);
            }
            entries.push_back(QueuedJob {
                job_id: job_id.to_string(),
                user_id: user_id.to_string(),
            });
            user_position(&entries, user_id, job_id)
        };
        tracing::debug!(job_id, user_id, position, "job queued");
        self.available.notify_one();
        position
    }

    pub fn take(&self) -> Option<QueuedJob> {
        let mut entries = self.lock();
        let idx = self.selector.choose_next(&entries)?;
        entries.remove(idx)
    }

    /// Earliest job owned by `user_id`.
    pub fn take_user(&self, user_id: &str) -> Option<QueuedJob> {
        let mut entries = self.lock();
        let idx = entries.iter().position(|e| e.user_id == user_id)?;
        entries.remove(idx)
    }

    /// Earliest job owned by anyone but `user_id`; falls back to [`Self::take`]
    /// when only that user has queued work.
    pub fn take_except(&self, user_id: &str) -> Option<QueuedJob> {
        let mut entries = self.lock();
        if let Some(idx) = entries.iter().position(|e| e.user_id != user_id) {
            return entries.remove(idx);
        }
        let idx = self.selector.choose_next(&entries)?;
        entries.remove(idx)
    }

    /// Shifts a job one position toward the head of the global order.
    pub fn move_job_to_head(&self, job_id: &str) -> Result<(), ExecError> {
        let mut entries = self.lock();
        let idx = index_of(&entries, job_id)?;
        if idx > 0 {
            entries.swap(idx, idx - 1);
        }
        Ok(())
    }

    /// Shifts a job one position toward the tail of the global order.
    pub fn move_job_to_tail(&self, job_id: &str) -> Result<(), ExecError> {
        let mut entries = self.lock();
        let idx = index_of(&entries, job_id)?;
        if idx + 1 < entries.len() {
            entries.swap(idx, idx + 1);
        }
        Ok(())
    }

    /// Swaps a job with the previous job of the same user.
    pub fn move_user_job_to_head(&self, user_id: &str, job_id: &str) -> Result<(), ExecError> {
        let mut entries = self.lock();
        let idx = owned_index_of(&entries, user_id, job_id)?;
        if let Some(prev) = (0..idx).rev().find(|i| entries[*i].user_id == user_id) {
            entries.swap(idx, prev);
        }
        Ok(())
    }

    /// Swaps a job with the next job of the same user.
    pub fn move_user_job_to_tail(&self, user_id: &str, job_id: &str) -> Result<(), ExecError> {
        let mut entries = self.lock();
        let idx = owned_index_of(&entries, user_id, job_id)?;
        if let Some(next) = (idx + 1..entries.len()).find(|i| entries[*i].user_id == user_id) {
            entries.swap(idx, next);
        }
        Ok(())
    }

    pub fn remove_job(&self, job_id: &str) -> Result<QueuedJob, ExecError> {
        let mut entries = self.lock();
        let idx = index_of(&entries, job_id)?;
        entries
            .remove(idx)
            .ok_or_else(|| not_queued(job_id))
    }

    pub fn remove_user_job(&self, user_id: &str, job_id: &str) -> Result<QueuedJob, ExecError> {
        let mut entries = self.lock();
        let idx = owned_index_of(&entries, user_id, job_id)?;
        entries
            .remove(idx)
            .ok_or_else(|| not_queued(job_id))
    }

    /// Wipes the backlog of one user, or of everyone when `user_id` is `None`.
    pub fn remove_user_jobs(&self, user_id: Option<&str>) -> Vec<JobId> {
        let mut entries = self.lock();
        let mut removed = Vec::new();
        entries.retain(|e| {
            let hit = user_id.map_or(true, |u| e.user_id == u);
            if hit {
                removed.push(e.job_id.clone());
            }
            !hit
        });
        removed
    }

    pub fn user_jobs(&self, user_id: &str) -> Vec<JobId> {
        self.lock()
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.job_id.clone())
            .collect()
    }

    pub fn user_queues(&self) -> BTreeMap<UserId, Vec<JobId>> {
        let mut out: BTreeMap<UserId, Vec<JobId>> = BTreeMap::new();
        for e in self.lock().iter() {
            out.entry(e.user_id.clone())
                .or_default()
                .push(e.job_id.clone());
        }
        out
    }

    pub fn all_jobs(&self) -> Vec<QueuedJob> {
        self.lock().iter().cloned().collect()
    }

    pub fn has_more_jobs(&self, user_id: &str) -> bool {
        self.lock().iter().any(|e| e.user_id == user_id)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().iter().any(|e| e.job_id == job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolves once a job has been put since the last wake-up.
    pub async fn wait_for_job(&self) {
        self.available.notified().await
    }
}

fn not_queued(job_id: &str) -> ExecError {
    ExecError::QueueState(format!("job {job_id} is not queued"))
}

fn index_of(entries: &VecDeque<QueuedJob>, job_id: &str) -> Result<usize, ExecError> {
    entries
        .iter()
        .position(|e| e.job_id == job_id)
        .ok_or_else(|| not_queued(job_id))
}

fn owned_index_of(
    entries: &VecDeque<QueuedJob>,
    user_id: &str,
    job_id: &str,
) -> Result<usize, ExecError> {
    let idx = index_of(entries, job_id)?;
    if entries[idx].user_id != user_id {
        return Err(ExecError::QueueState(format!(
            "job {job_id} does not belong to user {user_id}"
        )));
    }
    Ok(idx)
}

fn user_position(entries: &VecDeque<QueuedJob>, user_id: &str, job_id: &str) -> usize {
    entries
        .iter()
        .filter(|e| e.user_id == user_id)
        .position(|e| e.job_id == job_id)
        .map_or(0, |p| p + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(q: &JobQueue) -> Vec<String> {
        q.all_jobs().into_iter().map(|e| e.job_id).collect()
    }

    #[test]
    fn put_returns_position_within_user_queue() {
        let q = JobQueue::new();
        assert_eq!(q.put("j1", "alice"), 1);
        assert_eq!(q.put("j2", "bob"), 1);
        assert_eq!(q.put("j3", "alice"), 2);
        assert_eq!(q.put("j1", "alice"), 1);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn take_is_fifo_across_users() {
        let q = JobQueue::new();
        q.put("j1", "alice");
        q.put("j2", "bob");
        q.put("j3", "alice");
        assert_eq!(q.take().unwrap().job_id, "j1");
        assert_eq!(q.take_user("alice").unwrap().job_id, "j3");
        assert_eq!(q.take().unwrap().job_id, "j2");
        assert!(q.take().is_none());
    }

    #[test]
    fn take_except_skips_user_and_falls_back() {
        let q = JobQueue::new();
        q.put("a1", "alice");
        q.put("a2", "alice");
        q.put("b1", "bob");
        assert_eq!(q.take_except("alice").unwrap().job_id, "b1");
        assert_eq!(q.take_except("alice").unwrap().job_id, "a1");
    }

    #[test]
    fn global_moves_shift_one_position() {
        let q = JobQueue::new();
        for (j, u) in [("j1", "a"), ("j2", "b"), ("j3", "a")] {
            q.put(j, u);
        }
        q.move_job_to_head("j3").unwrap();
        assert_eq!(ids(&q), ["j1", "j3", "j2"]);
        q.move_job_to_head("j1").unwrap();
        assert_eq!(ids(&q), ["j1", "j3", "j2"]);
        q.move_job_to_tail("j1").unwrap();
        assert_eq!(ids(&q), ["j3", "j1", "j2"]);
        q.move_job_to_tail("j2").unwrap();
        assert_eq!(ids(&q), ["j3", "j1", "j2"]);
        assert!(matches!(
            q.move_job_to_head("nope"),
            Err(ExecError::QueueState(_))
        ));
    }

    #[test]
    fn user_moves_swap_with_same_user_neighbour() {
        let q = JobQueue::new();
        for (j, u) in [("a1", "a"), ("b1", "b"), ("a2", "a"), ("b2", "b")] {
            q.put(j, u);
        }
        q.move_user_job_to_head("a", "a2").unwrap();
        assert_eq!(ids(&q), ["a2", "b1", "a1", "b2"]);
        q.move_user_job_to_tail("b", "b1").unwrap();
        assert_eq!(ids(&q), ["a2", "b2", "a1", "b1"]);
        assert!(q.move_user_job_to_head("b", "a1").is_err());
        assert_eq!(q.user_jobs("a"), ["a2", "a1"]);
    }

    #[test]
    fn removal_by_id_and_by_user() {
        let q = JobQueue::new();
        for (j, u) in [("a1", "a"), ("b1", "b"), ("a2", "a")] {
            q.put(j, u);
        }
        assert!(q.remove_user_job("b", "a1").is_err());
        assert_eq!(q.len(), 3);
        assert_eq!(q.remove_job("b1").unwrap().user_id, "b");
        assert!(q.remove_job("b1").is_err());
        assert_eq!(q.remove_user_jobs(Some("a")), ["a1", "a2"]);
        assert!(q.is_empty());

        q.put("x", "x");
        q.put("y", "y");
        assert_eq!(q.remove_user_jobs(None), ["x", "y"]);
    }

    #[test]
    fn user_queues_group_by_owner() {
        let q = JobQueue::new();
        for (j, u) in [("a1", "a"), ("b1", "b"), ("a2", "a")] {
            q.put(j, u);
        }
        let queues = q.user_queues();
        assert_eq!(queues["a"], ["a1", "a2"]);
        assert_eq!(queues["b"], ["b1"]);
        assert!(q.has_more_jobs("b"));
        assert!(!q.has_more_jobs("c"));
    }
}
