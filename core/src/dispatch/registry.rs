use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::monitor::spawn_monitor;
use super::traits::BackendExecutor;
use crate::error::ExecError;
use crate::model::{ExecutionStatus, ExecutionTask, ProcessingComponent};

/// Registered backends, in registration order.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: Vec<Arc<dyn BackendExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn BackendExecutor>) {
        tracing::debug!(backend = executor.name(), "backend registered");
        self.executors.push(executor);
    }

    pub fn executors(&self) -> &[Arc<dyn BackendExecutor>] {
        &self.executors
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn BackendExecutor>> {
        self.executors.iter().find(|e| e.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// The backend whose `supports` predicate accepts `component`.
    ///
    /// Support sets are expected to be disjoint. If several backends match,
    /// the first registered one wins and the ambiguity is logged.
    pub fn find_for(
        &self,
        component: &ProcessingComponent,
    ) -> Result<Arc<dyn BackendExecutor>, ExecError> {
        let mut matches = self.executors.iter().filter(|e| e.supports(component));
        let Some(first) = matches.next() else {
            return Err(ExecError::NoExecutorFound(component.id.clone()));
        };
        let others: Vec<&str> = matches.map(|e| e.name()).collect();
        if !others.is_empty() {
            tracing::warn!(
                component = %component.id,
                chosen = first.name(),
                also = ?others,
                "component supported by more than one backend"
            );
        }
        Ok(first.clone())
    }
}

/// Routes task operations to backends and owns their lifecycle.
pub struct Dispatcher {
    registry: ExecutorRegistry,
    monitors: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Mutex<CancellationToken>,
    initialized: AtomicBool,
}

impl Dispatcher {
    pub fn new(registry: ExecutorRegistry) -> Self {
        Self {
            registry,
            monitors: Mutex::new(Vec::new()),
            shutdown: Mutex::new(CancellationToken::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Initializes every backend and starts the monitor loops of those that
    /// reconcile remote state. Stops at the first backend that fails.
    pub async fn initialize_all(&self) -> Result<(), ExecError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let shutdown = self.live_shutdown();
        for executor in self.registry.executors() {
            if let Err(e) = executor.initialize().await {
                tracing::error!(
                    backend = executor.name(),
                    error = %e,
                    "backend initialization failed"
                );
                self.initialized.store(false, Ordering::SeqCst);
                return Err(e);
            }
            if let Some(interval) = executor.monitor_interval() {
                let handle = spawn_monitor(executor.clone(), interval, shutdown.child_token());
                self.monitors_lock().push(handle);
            }
            tracing::info!(backend = executor.name(), "backend ready");
        }
        Ok(())
    }

    /// Stops the monitor loops and closes every backend, best-effort.
    pub async fn close_all(&self) {
        self.shutdown_lock().cancel();
        let handles: Vec<_> = self.monitors_lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        for executor in self.registry.executors() {
            executor.close().await;
        }
        self.initialized.store(false, Ordering::SeqCst);
    }

    pub async fn execute_component(
        &self,
        task: &ExecutionTask,
    ) -> Result<ExecutionStatus, ExecError> {
        let executor = self.route(task)?;
        tracing::info!(
            task_id = %task.id,
            job_id = %task.job_id,
            backend = executor.name(),
            "dispatching task"
        );
        executor.execute(task).await
    }

    pub async fn stop_execution(&self, task: &ExecutionTask) -> Result<(), ExecError> {
        let executor = self.route(task)?;
        executor.stop(task).await
    }

    pub async fn suspend(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        self.route(task)?.suspend(task).await
    }

    pub async fn resume(&self, task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
        self.route(task)?.resume(task).await
    }

    /// A task already handed to a backend goes back to that backend;
    /// otherwise the capability lookup decides.
    fn route(&self, task: &ExecutionTask) -> Result<Arc<dyn BackendExecutor>, ExecError> {
        if let Some(executor) = task.backend.as_deref().and_then(|b| self.registry.by_name(b)) {
            return Ok(executor);
        }
        let component = task.processing_component().ok_or_else(|| {
            ExecError::Execution(format!("task {} is a group and cannot be dispatched", task.id))
        })?;
        self.registry.find_for(component)
    }

    /// The token monitors hang off; a token cancelled by an earlier
    /// `close_all` is replaced so the dispatcher can be started again.
    fn live_shutdown(&self) -> CancellationToken {
        let mut token = self.shutdown_lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    fn shutdown_lock(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.shutdown.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn monitors_lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.monitors.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    struct Named {
        name: &'static str,
        accepts: fn(&ProcessingComponent) -> bool,
        inits: AtomicUsize,
        ticks: Arc<AtomicUsize>,
        monitor: bool,
    }

    impl Named {
        fn new(name: &'static str, accepts: fn(&ProcessingComponent) -> bool) -> Self {
            Self {
                name,
                accepts,
                inits: AtomicUsize::new(0),
                ticks: Arc::new(AtomicUsize::new(0)),
                monitor: false,
            }
        }
    }

    #[async_trait]
    impl BackendExecutor for Named {
        fn name(&self) -> &str {
            self.name
        }
        async fn initialize(&self) -> Result<(), ExecError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn close(&self) {}
        fn supports(&self, component: &ProcessingComponent) -> bool {
            (self.accepts)(component)
        }
        async fn execute(&self, _task: &ExecutionTask) -> Result<ExecutionStatus, ExecError> {
            Ok(ExecutionStatus::Done)
        }
        async fn stop(&self, _task: &ExecutionTask) -> Result<(), ExecError> {
            Ok(())
        }
        fn monitor_interval(&self) -> Option<Duration> {
            self.monitor.then(|| Duration::from_millis(5))
        }
        async fn monitor(&self) -> Result<(), ExecError> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn grid_only(c: &ProcessingComponent) -> bool {
        c.wants_backend("grid")
    }

    fn everything(_c: &ProcessingComponent) -> bool {
        true
    }

    #[test]
    fn no_backend_is_an_error() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(Named::new("grid", grid_only)));
        let err = registry
            .find_for(&ProcessingComponent::new("otb", "otbcli_BandMath"))
            .err()
            .unwrap();
        assert!(matches!(err, ExecError::NoExecutorFound(id) if id == "otb"));
    }

    #[test]
    fn first_registered_match_wins() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(Named::new("grid", grid_only)));
        registry.register(Arc::new(Named::new("catch-all", everything)));

        let grid = ProcessingComponent::new("otb", "otbcli_BandMath").with_backend("grid");
        assert_eq!(registry.find_for(&grid).unwrap().name(), "grid");
        let plain = ProcessingComponent::new("gdal", "gdalinfo");
        assert_eq!(registry.find_for(&plain).unwrap().name(), "catch-all");
    }

    #[test]
    fn dispatched_task_routes_to_its_backend() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(Named::new("grid", grid_only)));
        registry.register(Arc::new(Named::new("catch-all", everything)));
        let dispatcher = Dispatcher::new(registry);

        let gdal = ProcessingComponent::new("gdal", "gdalinfo");
        let mut task = ExecutionTask::component("t1", "j1", gdal);
        assert_eq!(dispatcher.route(&task).unwrap().name(), "catch-all");
        task.backend = Some("grid".into());
        assert_eq!(dispatcher.route(&task).unwrap().name(), "grid");
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_close_stops_monitors() {
        let mut backend = Named::new("grid", grid_only);
        backend.monitor = true;
        let ticks = backend.ticks.clone();
        let backend = Arc::new(backend);
        let mut registry = ExecutorRegistry::new();
        registry.register(backend.clone());
        let dispatcher = Dispatcher::new(registry);

        dispatcher.initialize_all().await.unwrap();
        dispatcher.initialize_all().await.unwrap();
        assert_eq!(backend.inits.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        dispatcher.close_all().await;
        let after_close = ticks.load(Ordering::SeqCst);
        assert!(after_close > 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_close);
    }

    #[tokio::test]
    async fn monitors_restart_after_close_and_initialize() {
        let mut backend = Named::new("grid", grid_only);
        backend.monitor = true;
        let ticks = backend.ticks.clone();
        let backend = Arc::new(backend);
        let mut registry = ExecutorRegistry::new();
        registry.register(backend.clone());
        let dispatcher = Dispatcher::new(registry);

        dispatcher.initialize_all().await.unwrap();
        dispatcher.close_all().await;
        dispatcher.initialize_all().await.unwrap();
        assert_eq!(backend.inits.load(Ordering::SeqCst), 2);

        let before = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(ticks.load(Ordering::SeqCst) > before);
        dispatcher.close_all().await;
    }
}
