use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::traits::BackendExecutor;

/// Runs `executor.monitor()` every `interval` until `cancel` fires.
///
/// Tick errors are logged and swallowed; a flaky session never takes the
/// loop down.
pub fn spawn_monitor(
    executor: Arc<dyn BackendExecutor>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first pass
        // runs one interval after initialization.
        ticker.tick().await;

        tracing::debug!(
            backend = executor.name(),
            interval_ms = interval.as_millis() as u64,
            "monitor started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = executor.monitor().await {
                        tracing::warn!(
                            backend = executor.name(),
                            error = %e,
                            "monitor tick failed"
                        );
                    }
                }
            }
        }
        tracing::debug!(backend = executor.name(), "monitor stopped");
    })
}
