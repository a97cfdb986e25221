use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::dispatch::{Dispatcher, ExecutorRegistry};
use crate::error::ExecError;
use crate::executor::{
    CommandBuilder, ConcurrencyStrategyPlugin, Orchestrator, OrchestratorOptions,
    RetryStrategyPlugin,
};
use crate::persistence::Persistence;
use crate::queue::JobQueue;
use crate::runner::CommandRunner;
use crate::state::ExecutionStateManager;
use crate::topology::{Installer, TopologyManager};

/// Runners, installers and strategies built from config.
#[derive(Clone)]
pub struct Services {
    pub local_runner: Arc<dyn CommandRunner>,
    pub remote_runner: Arc<dyn CommandRunner>,
    pub installers: Vec<Arc<dyn Installer>>,
    pub retry: Arc<dyn RetryStrategyPlugin>,
    pub concurrency: Arc<dyn ConcurrencyStrategyPlugin>,
    pub commands: Arc<dyn CommandBuilder>,
}

/// What backends may hold on to.
#[derive(Clone)]
pub struct BackendDeps {
    pub state: ExecutionStateManager,
    pub topology: Arc<TopologyManager>,
    pub services: Services,
}

#[async_trait::async_trait]
pub trait BackendFactory: Send + Sync {
    async fn build_services(&self, cfg: &AppConfig) -> Result<Services, ExecError>;
    async fn build_backends(
        &self,
        cfg: &AppConfig,
        deps: &BackendDeps,
    ) -> Result<ExecutorRegistry, ExecError>;
}

/// Explicitly constructed owner of every long-lived component.
#[derive(Clone)]
pub struct AppContext {
    cfg: AppConfig,
    store: Arc<dyn Persistence>,
    state: ExecutionStateManager,
    queue: Arc<JobQueue>,
    topology: Arc<TopologyManager>,
    dispatcher: Arc<Dispatcher>,
    orchestrator: Orchestrator,
    services: Services,
    shutdown: CancellationToken,
}

impl AppContext {
    pub async fn new(
        cfg: AppConfig,
        store: Arc<dyn Persistence>,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Self, ExecError> {
        let services = factory.build_services(&cfg).await?;
        let state = ExecutionStateManager::new(store.clone());
        let queue = Arc::new(JobQueue::new());
        let topology = Arc::new(TopologyManager::new(
            cfg.topology.master.clone(),
            services.installers.clone(),
            services.remote_runner.clone(),
            store.clone(),
        ));
        let deps = BackendDeps {
            state: state.clone(),
            topology: topology.clone(),
            services: services.clone(),
        };
        let registry = factory.build_backends(&cfg, &deps).await?;
        if registry.is_empty() {
            return Err(ExecError::Config("no backend configured".to_string()));
        }
        let dispatcher = Arc::new(Dispatcher::new(registry));
        let orchestrator = Orchestrator::new(
            state.clone(),
            queue.clone(),
            dispatcher.clone(),
            services.retry.clone(),
            services.concurrency.clone(),
            OrchestratorOptions {
                max_concurrency: cfg.executor.effective_max_concurrency(),
                idle_poll: Duration::from_millis(cfg.executor.idle_poll_ms.max(1)),
            },
        );
        Ok(Self {
            cfg,
            store,
            state,
            queue,
            topology,
            dispatcher,
            orchestrator,
            services,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn store(&self) -> Arc<dyn Persistence> {
        self.store.clone()
    }

    pub fn state(&self) -> &ExecutionStateManager {
        &self.state
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.topology
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Token cancelled by [`Self::shutdown`]; worker loops select on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Loads the topology, initializes backends and re-queues unfinished jobs.
    pub async fn start(&self) -> Result<(), ExecError> {
        self.topology.seed(self.cfg.topology.nodes.clone()).await?;
        self.topology.initialize().await?;
        self.dispatcher.initialize_all().await?;
        self.orchestrator.recover().await?;
        Ok(())
    }

    /// Stops worker loops and monitors, then closes every backend.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.dispatcher.close_all().await;
        tracing::info!("context shut down");
    }
}
