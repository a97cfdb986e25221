//! Cross-user scheduling queue.
//!
//! The queue is a scheduling view over durable job state, not the system of
//! record; [`JobQueue::initialize`] rebuilds it from persistence on startup.

pub mod job_queue;
pub mod selector;

pub use job_queue::{JobQueue, QueuedJob};
pub use selector::{FirstComeSelector, JobSelector};
