use std::collections::BTreeSet;
use std::sync::Arc;

use geoflow_core::model::{ExecutionStatus, JobSpec, ProcessingComponent, TaskSpec};
use geoflow_core::persistence::{InMemoryPersistence, Persistence};
use geoflow_core::queue::JobQueue;
use geoflow_core::state::ExecutionStateManager;

const USERS: [&str; 3] = ["ana", "bob", "chen"];

/// Union of the per-user views must equal the global view, with no id twice.
fn assert_consistent(queue: &JobQueue, expected: &BTreeSet<String>) {
    let global: Vec<String> = queue.all_jobs().into_iter().map(|q| q.job_id).collect();
    let global_set: BTreeSet<String> = global.iter().cloned().collect();
    assert_eq!(global.len(), global_set.len(), "duplicate ids in {global:?}");
    assert_eq!(&global_set, expected);

    let mut from_users = Vec::new();
    for (user, jobs) in queue.user_queues() {
        for job in &jobs {
            assert!(queue.contains(job));
            assert!(queue.has_more_jobs(&user));
        }
        assert_eq!(queue.user_jobs(&user), jobs);
        from_users.extend(jobs);
    }
    from_users.sort();
    let mut sorted = global;
    sorted.sort();
    assert_eq!(from_users, sorted);
}

#[test]
fn ids_are_conserved_across_mixed_operations() {
    let queue = JobQueue::new();
    let mut expected = BTreeSet::new();
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move |bound: u64| {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        seed % bound
    };

    for step in 0..400u32 {
        let user = USERS[next(3) as usize];
        match next(7) {
            0 | 1 => {
                let id = format!("job-{step}");
                queue.put(&id, user);
                expected.insert(id);
            }
            2 => {
                if let Some(job) = queue.take_except(user) {
                    assert!(expected.remove(&job.job_id));
                }
            }
            3 => {
                if let Some(job) = queue.take_user(user) {
                    assert_eq!(job.user_id, user);
                    assert!(expected.remove(&job.job_id));
                }
            }
            4 => {
                if let Some(newest) = queue.user_jobs(user).last().cloned() {
                    queue.move_user_job_to_head(user, &newest).unwrap();
                }
            }
            5 => {
                if let Some(job) = queue.all_jobs().first().cloned() {
                    queue.move_job_to_tail(&job.job_id).unwrap();
                }
            }
            _ => {
                if let Some(job) = queue.user_jobs(user).first().cloned() {
                    queue.remove_user_job(user, &job).unwrap();
                    expected.remove(&job);
                }
            }
        }
        assert_consistent(&queue, &expected);
    }
}

#[test]
fn removing_a_foreign_job_through_a_user_view_fails() {
    let queue = JobQueue::new();
    queue.put("a1", "ana");
    queue.put("b1", "bob");

    assert!(queue.remove_user_job("bob", "a1").is_err());
    assert!(queue.move_user_job_to_tail("bob", "a1").is_err());
    assert!(queue.contains("a1"));
    assert_eq!(queue.remove_user_jobs(Some("ana")), vec!["a1".to_string()]);
    assert_eq!(queue.len(), 1);
}

#[test]
fn take_except_prefers_other_users_then_falls_back() {
    let queue = JobQueue::new();
    queue.put("a1", "ana");
    queue.put("a2", "ana");
    queue.put("b1", "bob");

    assert_eq!(queue.take_except("ana").unwrap().job_id, "b1");
    assert_eq!(queue.take_except("ana").unwrap().job_id, "a1");
    assert_eq!(queue.take_except("bob").unwrap().job_id, "a2");
    assert!(queue.take_except("ana").is_none());
}

#[tokio::test]
async fn unfinished_jobs_are_requeued_from_the_store() {
    let store = Arc::new(InMemoryPersistence::new());
    let state = ExecutionStateManager::new(store.clone());
    let task = |id: &str| TaskSpec::component(ProcessingComponent::new(id, "echo"));

    state
        .register_job(JobSpec::new("ana", vec![task("t1")]).with_id("queued"))
        .await
        .unwrap();
    state.mark_job_queued("queued").await.unwrap();
    let done = state
        .register_job(JobSpec::new("bob", vec![task("t2")]).with_id("done"))
        .await
        .unwrap();
    let done_task = done.tasks[0].clone();
    state
        .transition(&done_task, ExecutionStatus::Running, None)
        .await
        .unwrap();
    state
        .transition(&done_task, ExecutionStatus::Done, None)
        .await
        .unwrap();

    let queue = JobQueue::new();
    let recovered = queue.initialize(store.as_ref()).await.unwrap();

    assert_eq!(recovered, 1);
    assert_eq!(queue.user_jobs("ana"), vec!["queued".to_string()]);
    assert!(!queue.contains("done"));
    let job = store.get_job("queued").await.unwrap().unwrap();
    assert_eq!(job.status, ExecutionStatus::Undetermined);
}
