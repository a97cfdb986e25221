use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use geoflow_cli::app;
use geoflow_cli::commands::{cli, exec, nodes};
use geoflow_core::error::{self, ExecError};
use geoflow_core::persistence::InMemoryPersistence;
use geoflow_core::AppContext;
use geoflow_plugins::PluginBackendFactory;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, error::CliError> {
    let args = cli::Args::parse();
    let cfg = match args.config.as_deref() {
        Some(path) => geoflow_core::config::load_from_path(Path::new(path)),
        None => geoflow_core::config::load_default(),
    }
    .map_err(|e| error::CliError::Config(e.to_string()))?;
    init_tracing(&cfg.logging).map_err(error::CliError::Command)?;

    let ctx = AppContext::new(
        cfg,
        Arc::new(InMemoryPersistence::new()),
        Arc::new(PluginBackendFactory),
    )
    .await?;

    dispatch(args.command, &ctx).await
}

fn exit_code_for_error(e: &error::CliError) -> i32 {
    // 0: success
    // 11: config error
    // 20: connection / IO error
    // 30: node lifecycle error
    // 40: queue or state error
    // 50: internal/uncategorized
    match e {
        error::CliError::Config(_) => 11,
        error::CliError::Exec(ee) => match ee {
            ExecError::Config(_) => 11,
            ExecError::Connection { .. }
            | ExecError::Authentication { .. }
            | ExecError::Timeout(_)
            | ExecError::StreamIo { .. }
            | ExecError::Io(_) => 20,
            ExecError::Topology(_) => 30,
            ExecError::QueueState(_) | ExecError::Transition(_) | ExecError::Persistence(_) => 40,
            _ => 50,
        },
        error::CliError::Io(_) => 20,
        error::CliError::Command(_) => 20,
        error::CliError::Anyhow(_) => 50,
    }
}

async fn dispatch(cmd: cli::Commands, ctx: &AppContext) -> Result<i32, error::CliError> {
    match cmd {
        cli::Commands::Submit(submit_args) => app::submit(submit_args, ctx).await,
        cli::Commands::Run(run_args) => app::run(run_args, ctx).await,
        cli::Commands::Nodes(node_cmd) => nodes::handle_nodes(node_cmd, ctx).await,
        cli::Commands::Images => app::images(ctx).await,
        cli::Commands::Exec(exec_args) => exec::handle_exec(exec_args, ctx).await,
    }
}

fn init_tracing(logging: &geoflow_core::config::LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("geoflow"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let appender = tracing_appender::rolling::never(dir, "geoflow.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    // stdout carries command output and JSON events, so logs go to stderr
    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
