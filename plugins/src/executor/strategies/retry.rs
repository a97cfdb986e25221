//! Delay schedules for re-dispatching a task after a failed attempt.
//!
//! Only backend-level failures come back here: a lost connection or a
//! timeout (`ExecError::is_retryable`). A command that ran and exited
//! non-zero is recorded as FAILED and never re-dispatched, and credential
//! errors bench the node instead. `attempt` counts failed dispatches of one
//! task, starting at zero.

use std::time::Duration;

use geoflow_core::executor::types::RetryConfig;
use geoflow_core::executor::RetryStrategyPlugin;

/// Doubles the delay after every failed dispatch, capped at `max_delay_ms`.
pub struct ExponentialBackoffPlugin {
    config: RetryConfig,
}

/// Grows the delay by `base_delay_ms` per failed dispatch.
pub struct LinearRetryPlugin {
    config: RetryConfig,
}

impl ExponentialBackoffPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl LinearRetryPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl RetryStrategyPlugin for ExponentialBackoffPlugin {
    fn name(&self) -> &str {
        "exponential-backoff"
    }

    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        scaled_delay(&self.config, attempt, 1u64 << attempt.min(30))
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

impl RetryStrategyPlugin for LinearRetryPlugin {
    fn name(&self) -> &str {
        "linear"
    }

    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        scaled_delay(&self.config, attempt, u64::from(attempt.saturating_add(1)))
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

/// `base_delay_ms * factor`, capped; `None` once the attempts are spent.
fn scaled_delay(config: &RetryConfig, attempt: u32, factor: u64) -> Option<Duration> {
    if attempt >= config.max_attempts {
        return None;
    }
    let delay = config.base_delay_ms.saturating_mul(factor);
    Some(Duration::from_millis(delay.min(config.max_delay_ms)))
}

#[cfg(test)]
mod tests {
    use geoflow_core::error::ExecError;

    use super::*;

    fn cfg(strategy: &str, base: u64, max: u64, attempts: u32) -> RetryConfig {
        RetryConfig {
            strategy: strategy.to_string(),
            base_delay_ms: base,
            max_delay_ms: max,
            max_attempts: attempts,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let plugin = ExponentialBackoffPlugin::new(cfg("exponential-backoff", 100, 300, 3));
        assert_eq!(plugin.next_delay(0).unwrap().as_millis(), 100);
        assert_eq!(plugin.next_delay(1).unwrap().as_millis(), 200);
        assert_eq!(plugin.next_delay(2).unwrap().as_millis(), 300);
        assert_eq!(plugin.next_delay(3), None);
    }

    #[test]
    fn test_linear_backoff() {
        let plugin = LinearRetryPlugin::new(cfg("linear", 50, 200, 4));
        assert_eq!(plugin.next_delay(0).unwrap().as_millis(), 50);
        assert_eq!(plugin.next_delay(2).unwrap().as_millis(), 150);
        assert_eq!(plugin.next_delay(3).unwrap().as_millis(), 200);
    }

    #[test]
    fn only_backend_failures_are_retried() {
        let plugin = ExponentialBackoffPlugin::new(cfg("exponential-backoff", 10, 10, 2));
        let lost = ExecError::connection("worker-1", "connection reset");
        assert!(plugin.should_retry(0, &lost));
        assert!(plugin.should_retry(1, &lost));
        assert!(!plugin.should_retry(2, &lost));
        assert!(!plugin.should_retry(0, &ExecError::Execution("bad input".into())));
    }

    #[test]
    fn timeouts_retry_but_credentials_do_not() {
        let plugin = LinearRetryPlugin::new(cfg("linear", 10, 10, 3));
        assert!(plugin.should_retry(0, &ExecError::Timeout(Duration::from_secs(5))));
        let denied = ExecError::Authentication {
            host: "worker-1".into(),
            user: "geo".into(),
        };
        assert!(!plugin.should_retry(0, &denied));
    }
}
