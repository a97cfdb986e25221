//! Job submission and the worker loop on top of an [`AppContext`].
use std::path::Path;

use geoflow_core::error::CliError;
use geoflow_core::model::{ExecutionStatus, JobSpec, TaskKind};
use geoflow_core::state::ExecutionEvent;
use geoflow_core::AppContext;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::commands::cli::{RunArgs, SubmitArgs};

/// Reads a job file holding either one job document or an array of them.
pub fn load_jobs(path: &Path) -> Result<Vec<JobSpec>, CliError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CliError::Config(format!("cannot read {}: {e}", path.display())))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| CliError::Config(format!("invalid job file {}: {e}", path.display())))?;
    let jobs = if value.is_array() {
        serde_json::from_value::<Vec<JobSpec>>(value)
    } else {
        serde_json::from_value::<JobSpec>(value).map(|job| vec![job])
    }
    .map_err(|e| CliError::Config(format!("invalid job file {}: {e}", path.display())))?;
    if jobs.is_empty() {
        return Err(CliError::Config(format!("{} holds no jobs", path.display())));
    }
    Ok(jobs)
}

#[tracing::instrument(name = "cli.submit", skip(args, ctx), fields(file = %args.jobs))]
pub async fn submit(args: SubmitArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let specs = load_jobs(Path::new(&args.jobs))?;
    ctx.start().await?;
    let events = spawn_event_log(ctx, args.events);

    let mut job_ids = Vec::with_capacity(specs.len());
    for spec in specs {
        let (job, position) = ctx.orchestrator().submit(spec).await?;
        println!("submitted {} for {} (position {position})", job.id, job.user_id);
        job_ids.push(job.id);
    }

    let cancel = ctx.shutdown_token();
    let ctrl_c = cancel_on_ctrl_c(ctx.clone());
    let result = ctx.orchestrator().run_until_idle(cancel.clone()).await;
    ctrl_c.abort();
    events.cancel();
    result?;

    let mut all_done = true;
    for job_id in &job_ids {
        let Some(job) = ctx.state().job(job_id).await else {
            all_done = false;
            println!("{job_id}\tUNKNOWN");
            continue;
        };
        println!("{}\t{}", job.id, job.status);
        if job.status != ExecutionStatus::Done {
            all_done = false;
            report_failures(ctx, job_id).await;
        }
    }
    ctx.shutdown().await;
    Ok(if all_done { 0 } else { 1 })
}

async fn report_failures(ctx: &AppContext, job_id: &str) {
    for task in ctx.state().job_tasks(job_id).await {
        if !matches!(task.kind, TaskKind::Component { .. }) {
            continue;
        }
        if matches!(task.status, ExecutionStatus::Failed | ExecutionStatus::Cancelled) {
            println!(
                "  {}\t{}\t{}",
                task.id,
                task.status,
                task.failure_reason.as_deref().unwrap_or("-")
            );
        }
    }
}

#[tracing::instrument(name = "cli.run", skip(args, ctx))]
pub async fn run(args: RunArgs, ctx: &AppContext) -> Result<i32, CliError> {
    ctx.start().await?;
    let events = spawn_event_log(ctx, args.events);
    let ctrl_c = cancel_on_ctrl_c(ctx.clone());

    tracing::info!(backends = ctx.dispatcher().registry().len(), "worker started");
    let result = ctx.orchestrator().run(ctx.shutdown_token()).await;

    ctrl_c.abort();
    events.cancel();
    ctx.shutdown().await;
    result?;
    Ok(0)
}

pub async fn images(ctx: &AppContext) -> Result<i32, CliError> {
    let images = ctx
        .topology()
        .available_docker_images()
        .await
        .map_err(geoflow_core::ExecError::from)?;
    for image in images {
        println!("{}\t{}", image.reference(), image.id);
    }
    Ok(0)
}

fn cancel_on_ctrl_c(ctx: AppContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            ctx.shutdown().await;
        }
    })
}

/// Forwards state events to the log, or to stdout as JSON lines when
/// `print` is set. Cancel the returned token to stop.
fn spawn_event_log(ctx: &AppContext, print: bool) -> CancellationToken {
    let stop = CancellationToken::new();
    let token = stop.clone();
    let mut rx = ctx.state().subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Ok(event) if print => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "cannot encode event"),
                },
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    stop
}

fn log_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::JobSubmitted {
            job_id, task_count, ..
        } => tracing::debug!("Job {} submitted ({} tasks)", job_id, task_count),
        ExecutionEvent::JobStatusChanged {
            job_id, new_status, ..
        } => tracing::info!("Job {} -> {}", job_id, new_status),
        ExecutionEvent::TaskStatusChanged {
            task_id,
            new_status,
            reason,
            ..
        } => match reason {
            Some(reason) => tracing::info!("Task {} -> {} ({})", task_id, new_status, reason),
            None => tracing::debug!("Task {} -> {}", task_id, new_status),
        },
        ExecutionEvent::TaskProgress {
            task_id, percent, ..
        } => tracing::debug!("Task {} at {:.0}%", task_id, percent),
    }
}
