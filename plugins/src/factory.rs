use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use geoflow_core::config::{AppConfig, BackendConfig, ExecutorConfig};
use geoflow_core::context::{BackendDeps, BackendFactory, Services};
use geoflow_core::dispatch::ExecutorRegistry;
use geoflow_core::error::ExecError;
use geoflow_core::executor::{
    ConcurrencyStrategyPlugin, RetryConfig, RetryStrategyPlugin, TemplateCommandBuilder,
};
use geoflow_core::runner::CommandRunner;
use geoflow_core::topology::Installer;

use crate::backend::{
    CliGridSession, ContainerExecutor, GridEngineExecutor, LocalProcessExecutor, SshExecutor,
};
use crate::executor::{
    AdaptiveConcurrencyPlugin, ExponentialBackoffPlugin, FixedConcurrencyPlugin, LinearRetryPlugin,
};
use crate::runner::{LocalProcessRunner, SshRunner};
use crate::topology::{docker_installer, StepInstaller};

pub fn build_local_runner() -> Arc<dyn CommandRunner> {
    Arc::new(LocalProcessRunner::new())
}

/// Runner for commands on other hosts.
pub fn build_runner(cfg: &AppConfig) -> Arc<dyn CommandRunner> {
    Arc::new(SshRunner::new(cfg.remote.clone()))
}

pub fn build_retry(cfg: &RetryConfig) -> Result<Arc<dyn RetryStrategyPlugin>, ExecError> {
    match cfg.strategy.as_str() {
        "exponential-backoff" | "exponential" => {
            Ok(Arc::new(ExponentialBackoffPlugin::new(cfg.clone())))
        }
        "linear" => Ok(Arc::new(LinearRetryPlugin::new(cfg.clone()))),
        other => Err(ExecError::Config(format!("unknown retry strategy '{other}'"))),
    }
}

pub fn build_concurrency(
    cfg: &ExecutorConfig,
) -> Result<Arc<dyn ConcurrencyStrategyPlugin>, ExecError> {
    match cfg.concurrency.strategy.as_str() {
        "fixed" => Ok(Arc::new(FixedConcurrencyPlugin::new(cfg.effective_max_concurrency()))),
        "adaptive" => Ok(Arc::new(AdaptiveConcurrencyPlugin::new(cfg.concurrency.clone()))),
        other => Err(ExecError::Config(format!("unknown concurrency strategy '{other}'"))),
    }
}

pub fn build_installers(
    cfg: &AppConfig,
    local: Arc<dyn CommandRunner>,
    remote: Arc<dyn CommandRunner>,
) -> Vec<Arc<dyn Installer>> {
    let mut installers: Vec<Arc<dyn Installer>> = Vec::new();
    if cfg.topology.install_docker {
        installers.push(Arc::new(docker_installer(remote.clone())));
    }
    if !cfg.topology.tools.is_empty() {
        installers.push(Arc::new(StepInstaller::new(
            cfg.topology.tools.clone(),
            cfg.topology.install_scripts_root.clone(),
            cfg.topology.master.clone(),
            local,
            remote,
        )));
    }
    installers
}

pub fn build_backends(cfg: &AppConfig, deps: &BackendDeps) -> Result<ExecutorRegistry, ExecError> {
    let timeout = cfg.executor.command_timeout_secs.map(Duration::from_secs);
    let services = &deps.services;
    let mut registry = ExecutorRegistry::new();
    for backend in &cfg.backends {
        match backend {
            BackendConfig::Process(p) => registry.register(Arc::new(
                LocalProcessExecutor::new(
                    services.local_runner.clone(),
                    services.commands.clone(),
                    deps.state.clone(),
                )
                .with_timeout(timeout)
                .with_working_dir(p.working_dir.as_ref().map(PathBuf::from)),
            )),
            BackendConfig::Ssh(s) => registry.register(Arc::new(
                SshExecutor::new(
                    services.remote_runner.clone(),
                    services.commands.clone(),
                    deps.topology.clone(),
                    deps.state.clone(),
                )
                .with_hosts(s.hosts.clone())
                .with_cooldown(Duration::from_secs(s.unhealthy_cooldown_secs))
                .with_timeout(timeout),
            )),
            BackendConfig::Container(c) => registry.register(Arc::new(
                ContainerExecutor::new(
                    services.local_runner.clone(),
                    services.remote_runner.clone(),
                    services.commands.clone(),
                    deps.topology.clone(),
                    deps.state.clone(),
                    cfg.container.clone(),
                )
                .on_host(c.host.clone())
                .with_timeout(timeout),
            )),
            BackendConfig::Grid(g) => {
                let session =
                    Arc::new(CliGridSession::new(services.local_runner.clone(), g.clone()));
                let interval = Duration::from_millis(cfg.executor.monitor_interval_ms.max(1));
                registry.register(Arc::new(
                    GridEngineExecutor::new(
                        session,
                        services.commands.clone(),
                        deps.state.clone(),
                        g.clone(),
                    )
                    .with_monitor_interval(interval),
                ))
            }
        }
        tracing::debug!(provider = backend.provider(), "backend registered");
    }
    Ok(registry)
}

/// Builds runners, strategies, installers and backends from config.
#[derive(Default)]
pub struct PluginBackendFactory;

#[async_trait]
impl BackendFactory for PluginBackendFactory {
    async fn build_services(&self, cfg: &AppConfig) -> Result<Services, ExecError> {
        let local_runner = build_local_runner();
        let remote_runner = build_runner(cfg);
        let installers = build_installers(cfg, local_runner.clone(), remote_runner.clone());
        Ok(Services {
            local_runner,
            remote_runner,
            installers,
            retry: build_retry(&cfg.retry)?,
            concurrency: build_concurrency(&cfg.executor)?,
            commands: Arc::new(TemplateCommandBuilder),
        })
    }

    async fn build_backends(
        &self,
        cfg: &AppConfig,
        deps: &BackendDeps,
    ) -> Result<ExecutorRegistry, ExecError> {
        build_backends(cfg, deps)
    }
}
