use std::sync::Mutex;
use std::time::{Duration, Instant};

use geoflow_core::executor::types::ConcurrencyConfig;
use geoflow_core::executor::{ConcurrencyContext, ConcurrencyStrategyPlugin};

const LOAD_REFRESH: Duration = Duration::from_secs(1);

/// Sizes the pool from the local CPU load: halves it under pressure and
/// doubles it when the host is mostly idle.
pub struct AdaptiveConcurrencyPlugin {
    config: ConcurrencyConfig,
    load: Mutex<LoadSampler>,
}

pub struct FixedConcurrencyPlugin {
    fixed: usize,
}

impl AdaptiveConcurrencyPlugin {
    pub fn new(config: ConcurrencyConfig) -> Self {
        Self {
            config,
            load: Mutex::new(LoadSampler::new()),
        }
    }
}

impl FixedConcurrencyPlugin {
    pub fn new(fixed: usize) -> Self {
        Self { fixed }
    }
}

struct LoadSampler {
    sys: sysinfo::System,
    sampled_at: Option<Instant>,
    cpu_usage: f32,
    memory_usage: f32,
}

impl LoadSampler {
    fn new() -> Self {
        Self {
            sys: sysinfo::System::new(),
            sampled_at: None,
            cpu_usage: 0.0,
            memory_usage: 0.0,
        }
    }

    fn sample(&mut self) -> (usize, f32, f32) {
        let stale = self.sampled_at.map_or(true, |at| at.elapsed() > LOAD_REFRESH);
        if stale {
            if self.sampled_at.is_none() {
                // CPU usage is a delta between two refreshes.
                self.sys.refresh_cpu();
                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            }
            self.sys.refresh_cpu();
            self.sys.refresh_memory();
            let cpus = self.sys.cpus().len().max(1);
            let total_cpu: f32 = self.sys.cpus().iter().map(|c| c.cpu_usage()).sum();
            self.cpu_usage = total_cpu / cpus as f32;
            let total = self.sys.total_memory().max(1);
            self.memory_usage = (self.sys.used_memory() as f32 / total as f32) * 100.0;
            self.sampled_at = Some(Instant::now());
        }
        (self.sys.cpus().len().max(1), self.cpu_usage, self.memory_usage)
    }
}

impl ConcurrencyStrategyPlugin for AdaptiveConcurrencyPlugin {
    fn name(&self) -> &str {
        "adaptive"
    }

    fn calculate_concurrency(&self, context: &ConcurrencyContext) -> usize {
        let mut desired = context.base_concurrency;

        if context.cpu_usage >= self.config.cpu_threshold_high {
            desired = desired.saturating_div(2).max(self.config.min_concurrency);
        } else if context.cpu_usage <= self.config.cpu_threshold_low {
            desired = desired.saturating_mul(2).min(self.config.max_concurrency);
        }

        desired.clamp(self.config.min_concurrency.max(1), self.config.max_concurrency.max(1))
    }

    fn observe(&self, base_concurrency: usize) -> ConcurrencyContext {
        let mut load = self.load.lock().unwrap_or_else(|p| p.into_inner());
        let (available_cpus, cpu_usage, memory_usage) = load.sample();
        tracing::debug!(cpu_usage, memory_usage, available_cpus, "sampled host load");
        ConcurrencyContext {
            cpu_usage,
            available_cpus,
            memory_usage,
            active_tasks: 0,
            base_concurrency,
        }
    }
}

impl ConcurrencyStrategyPlugin for FixedConcurrencyPlugin {
    fn name(&self) -> &str {
        "fixed"
    }

    fn calculate_concurrency(&self, _context: &ConcurrencyContext) -> usize {
        self.fixed.max(1)
    }
}
