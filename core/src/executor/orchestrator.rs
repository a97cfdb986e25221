use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::traits::{ConcurrencyStrategyPlugin, RetryStrategyPlugin};
use crate::dispatch::Dispatcher;
use crate::error::ExecError;
use crate::model::{ExecutionJob, ExecutionStatus, JobSpec, TaskId, TransitionBehavior};
use crate::queue::JobQueue;
use crate::state::{ExecutionStateManager, TransitionError};

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Hard cap on concurrently running jobs and on concurrently running tasks.
    pub max_concurrency: usize,
    /// Sleep between queue polls when nothing is queued.
    pub idle_poll: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get().max(1),
            idle_poll: Duration::from_secs(1),
        }
    }
}

/// The control path: takes jobs from the queue, walks their task trees and
/// dispatches leaves to backends, retrying backend-level failures.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    state: ExecutionStateManager,
    queue: Arc<JobQueue>,
    dispatcher: Arc<Dispatcher>,
    retry: Arc<dyn RetryStrategyPlugin>,
    job_slots: Arc<Semaphore>,
    task_slots: Arc<Semaphore>,
    idle_poll: Duration,
}

enum LoopMode {
    Forever,
    UntilIdle,
}

impl Orchestrator {
    pub fn new(
        state: ExecutionStateManager,
        queue: Arc<JobQueue>,
        dispatcher: Arc<Dispatcher>,
        retry: Arc<dyn RetryStrategyPlugin>,
        concurrency: Arc<dyn ConcurrencyStrategyPlugin>,
        options: OrchestratorOptions,
    ) -> Self {
        let cap = options.max_concurrency.max(1);
        let slots = concurrency
            .calculate_concurrency(&concurrency.observe(cap))
            .clamp(1, cap);
        tracing::info!(
            strategy = concurrency.name(),
            retry = retry.name(),
            slots,
            "orchestrator configured"
        );
        Self {
            inner: Arc::new(OrchestratorInner {
                state,
                queue,
                dispatcher,
                retry,
                job_slots: Arc::new(Semaphore::new(slots)),
                task_slots: Arc::new(Semaphore::new(slots)),
                idle_poll: options.idle_poll,
            }),
        }
    }

    pub fn state(&self) -> &ExecutionStateManager {
        &self.inner.state
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.inner.queue
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// Re-queues jobs left unfinished by a previous run.
    pub async fn recover(&self) -> Result<usize, ExecError> {
        let store = self.inner.state.store();
        let count = self.inner.queue.initialize(store.as_ref()).await?;
        for queued in self.inner.queue.all_jobs() {
            self.inner.state.restore_job(&queued.job_id).await?;
            self.inner.state.mark_job_queued(&queued.job_id).await?;
        }
        if count > 0 {
            tracing::info!(jobs = count, "recovered unfinished jobs");
        }
        Ok(count)
    }

    /// Registers a job, marks it queued and enqueues it. Returns the job and
    /// its 1-based position among its owner's queued jobs.
    pub async fn submit(&self, spec: JobSpec) -> Result<(ExecutionJob, usize), ExecError> {
        let job = self.inner.state.register_job(spec).await?;
        self.inner.state.mark_job_queued(&job.id).await?;
        let position = self.inner.queue.put(&job.id, &job.user_id);
        let job = self.inner.state.job(&job.id).await.unwrap_or(job);
        Ok((job, position))
    }

    /// Worker loop; returns after `cancel` fires and in-flight jobs finish.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ExecError> {
        self.drive(cancel, LoopMode::Forever).await
    }

    /// Runs until the queue is empty and no job is in flight.
    pub async fn run_until_idle(&self, cancel: CancellationToken) -> Result<(), ExecError> {
        self.drive(cancel, LoopMode::UntilIdle).await
    }

    async fn drive(&self, cancel: CancellationToken, mode: LoopMode) -> Result<(), ExecError> {
        let mut running = FuturesUnordered::new();
        let mut last_user: Option<String> = None;

        loop {
            while let Some(Some(joined)) = running.next().now_or_never() {
                log_join(joined);
            }
            if cancel.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.inner.job_slots.clone().acquire_owned() => permit
                    .map_err(|_| ExecError::QueueState("job slots closed".to_string()))?,
            };

            // Alternating away from the last served user keeps one user's
            // backlog from starving everyone else.
            let next = match last_user.as_deref() {
                Some(user) => self.inner.queue.take_except(user),
                None => self.inner.queue.take(),
            };
            let Some(next) = next else {
                drop(permit);
                if matches!(mode, LoopMode::UntilIdle) && running.is_empty() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.inner.queue.wait_for_job() => {}
                    _ = tokio::time::sleep(self.inner.idle_poll) => {}
                    Some(joined) = running.next(), if !running.is_empty() => log_join(joined),
                }
                continue;
            };

            last_user = Some(next.user_id.clone());
            let this = self.clone();
            running.push(tokio::spawn(async move { this.run_job(next.job_id, permit).await }));
        }

        while let Some(joined) = running.next().await {
            log_join(joined);
        }
        Ok(())
    }

    async fn run_job(&self, job_id: String, _permit: OwnedSemaphorePermit) -> ExecutionStatus {
        let Some(job) = self.inner.state.job(&job_id).await else {
            tracing::warn!(job_id = %job_id, "dequeued job is unknown");
            return ExecutionStatus::Undetermined;
        };
        tracing::info!(
            job_id = %job.id,
            user = %job.user_id,
            tasks = job.tasks.len(),
            "job started"
        );

        let mut tops: FuturesUnordered<_> =
            job.tasks.iter().cloned().map(|id| self.run_task(id)).collect();
        while tops.next().await.is_some() {}

        let status = self
            .inner
            .state
            .job(&job_id)
            .await
            .map(|j| j.status)
            .unwrap_or(ExecutionStatus::Undetermined);
        tracing::info!(job_id = %job_id, status = %status, "job finished");
        status
    }

    fn run_task(&self, task_id: TaskId) -> BoxFuture<'static, ()> {
        let this = self.clone();
        async move {
            let Some(task) = this.inner.state.task(&task_id).await else {
                return;
            };
            if task.status.is_terminal() {
                return;
            }
            let Some(behavior) = task.behavior() else {
                this.run_leaf(&task_id).await;
                return;
            };
            let children = task.children().to_vec();
            match behavior {
                TransitionBehavior::FailOnError => {
                    for child in children {
                        this.run_task(child).await;
                        let group_done = this
                            .inner
                            .state
                            .task(&task_id)
                            .await
                            .map(|g| g.status.is_terminal())
                            .unwrap_or(true);
                        if group_done {
                            break;
                        }
                    }
                }
                TransitionBehavior::ContinueOnError => {
                    let mut all: FuturesUnordered<_> =
                        children.into_iter().map(|c| this.run_task(c)).collect();
                    while all.next().await.is_some() {}
                }
            }
        }
        .boxed()
    }

    async fn run_leaf(&self, task_id: &str) {
        let Ok(_slot) = self.inner.task_slots.acquire().await else {
            return;
        };
        let mut attempt = 0u32;
        loop {
            // Re-read every attempt: the job may have been cancelled meanwhile.
            let Some(task) = self.inner.state.task(task_id).await else {
                return;
            };
            if task.status.is_terminal() {
                return;
            }
            let err = match self.inner.dispatcher.execute_component(&task).await {
                Ok(status) => {
                    tracing::debug!(task_id, status = %status, "task returned from backend");
                    return;
                }
                Err(e) => e,
            };

            if self.inner.retry.should_retry(attempt, &err) {
                if let Some(delay) = self.inner.retry.next_delay(attempt) {
                    attempt += 1;
                    tracing::warn!(
                        task_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "backend failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            let reason = if attempt > 0 {
                format!("{err} (gave up after {attempt} retries)")
            } else {
                err.to_string()
            };
            tracing::error!(task_id, error = %err, attempts = attempt + 1, "task failed");
            self.fail(task_id, reason).await;
            return;
        }
    }

    async fn fail(&self, task_id: &str, reason: String) {
        match self
            .inner
            .state
            .transition(task_id, ExecutionStatus::Failed, Some(reason))
            .await
        {
            Ok(_) | Err(ExecError::Transition(TransitionError::FromTerminalState { .. })) => {}
            Err(e) => tracing::error!(task_id, error = %e, "could not record task failure"),
        }
    }

    /// Cancels a job: drops it from the queue, marks its unfinished tasks
    /// `CANCELLED`, then asks backends to stop dispatched work without
    /// waiting for them. Returns the number of stop requests sent.
    pub async fn cancel_job(&self, job_id: &str) -> Result<usize, ExecError> {
        if self.inner.queue.remove_job(job_id).is_ok() {
            tracing::debug!(job_id, "cancelled job removed from queue");
        }
        let dispatched = self.inner.state.cancel_job(job_id).await?;
        let count = dispatched.len();
        for task in dispatched {
            let dispatcher = self.inner.dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatcher.stop_execution(&task).await {
                    tracing::warn!(task_id = %task.id, error = %e, "stop request failed");
                }
            });
        }
        tracing::info!(job_id, stop_requests = count, "job cancelled");
        Ok(count)
    }

    pub async fn suspend_task(&self, task_id: &str) -> Result<ExecutionStatus, ExecError> {
        self.control(task_id, true).await
    }

    pub async fn resume_task(&self, task_id: &str) -> Result<ExecutionStatus, ExecError> {
        self.control(task_id, false).await
    }

    async fn control(&self, task_id: &str, suspend: bool) -> Result<ExecutionStatus, ExecError> {
        let task = self
            .inner
            .state
            .task(task_id)
            .await
            .ok_or_else(|| ExecError::Execution(format!("unknown task {task_id}")))?;
        let status = if suspend {
            self.inner.dispatcher.suspend(&task).await?
        } else {
            self.inner.dispatcher.resume(&task).await?
        };
        self.inner.state.transition(task_id, status, None).await?;
        Ok(status)
    }
}

fn log_join(joined: Result<ExecutionStatus, tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "job runner panicked");
    }
}
