use std::collections::VecDeque;

use super::job_queue::QueuedJob;

/// Picks which queued entry an unrestricted `take()` hands out.
pub trait JobSelector: Send + Sync {
    fn name(&self) -> &str;
    /// Index into the global order, or `None` to hand out nothing.
    fn choose_next(&self, entries: &VecDeque<QueuedJob>) -> Option<usize>;
}

/// Global arrival order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstComeSelector;

impl JobSelector for FirstComeSelector {
    fn name(&self) -> &str {
        "first-come"
    }

    fn choose_next(&self, entries: &VecDeque<QueuedJob>) -> Option<usize> {
        if entries.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}
