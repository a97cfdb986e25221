use std::time::Duration;

use crate::error::ExecError;

/// Decides whether and when a failed dispatch is attempted again.
pub trait RetryStrategyPlugin: Send + Sync {
    fn name(&self) -> &str;
    /// Delay before retry number `attempt + 1`, `None` once attempts are used up.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
    fn max_attempts(&self) -> u32;
    /// Only backend-level failures (connection loss, timeouts) are retried;
    /// everything else is a task outcome.
    fn should_retry(&self, attempt: u32, error: &ExecError) -> bool {
        attempt < self.max_attempts() && error.is_retryable()
    }
}

/// Sizes the worker pool.
pub trait ConcurrencyStrategyPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn calculate_concurrency(&self, context: &ConcurrencyContext) -> usize;
    /// Load snapshot the pool is sized from.
    fn observe(&self, base_concurrency: usize) -> ConcurrencyContext {
        ConcurrencyContext::idle(base_concurrency)
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyContext {
    pub cpu_usage: f32,
    pub available_cpus: usize,
    pub memory_usage: f32,
    pub active_tasks: usize,
    pub base_concurrency: usize,
}

impl ConcurrencyContext {
    /// Context with no load information, sized on the local core count.
    pub fn idle(base_concurrency: usize) -> Self {
        Self {
            cpu_usage: 0.0,
            available_cpus: num_cpus::get().max(1),
            memory_usage: 0.0,
            active_tasks: 0,
            base_concurrency,
        }
    }
}
