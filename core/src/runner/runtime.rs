//! Drives one command session: password hand-off, live line streaming,
//! cancellation, timeout and guaranteed teardown.

use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::command::CommandSpec;
use super::io_pump::{self, LineFilter, LineStream, LineTap};
use super::traits::{LineConsumer, CommandRunner, RunnerSession};
use super::types::{RunOutcome, NO_EXIT_CODE};
use crate::error::ExecError;

const LINE_CHANNEL_CAPACITY: usize = 1024;
const DRAIN_GRACE: Duration = Duration::from_secs(5);

enum Stop {
    Exited(Result<i32, ExecError>),
    Cancelled,
    TimedOut(Duration),
}

enum Drain {
    Complete,
    Abandoned,
    PastDeadline,
}

/// A started command whose output has not been consumed yet.
///
/// Dropping it without [`RunningCommand::finish`] leaves teardown to the
/// session's own drop behavior.
pub struct RunningCommand<'a> {
    session: Box<dyn RunnerSession>,
    spec: &'a CommandSpec,
    runner: String,
    started_at: Instant,
}

impl<'a> RunningCommand<'a> {
    /// Backend handle of the running command (a pid, a channel id).
    pub fn resource_id(&self) -> Option<String> {
        self.session.resource_id()
    }

    /// Streams output to `consumer` until the command exited and both output
    /// streams reached EOF. The session is disconnected on every exit path.
    pub async fn finish(
        mut self,
        consumer: &mut dyn LineConsumer,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, ExecError> {
        let session = self.session.as_mut();
        let result = drive(session, self.spec, consumer, &cancel, self.started_at).await;
        self.session.disconnect().await;

        match &result {
            Ok(outcome) => tracing::info!(
                runner = %self.runner,
                host = %self.spec.host,
                exit_code = outcome.exit_code,
                cancelled = outcome.cancelled,
                duration_ms = outcome.duration_ms,
                "command finished"
            ),
            Err(e) => tracing::warn!(
                runner = %self.runner,
                host = %self.spec.host,
                error = %e,
                "command failed"
            ),
        }
        result
    }
}

/// Opens a session for `spec` without reading from it yet.
pub async fn start_command<'a>(
    runner: &dyn CommandRunner,
    spec: &'a CommandSpec,
) -> Result<RunningCommand<'a>, ExecError> {
    tracing::debug!(
        runner = runner.name(),
        host = %spec.host,
        command = %spec.command_line(),
        "starting command"
    );
    let started_at = Instant::now();
    let session = runner.start_session(spec).await?;
    Ok(RunningCommand {
        session,
        spec,
        runner: runner.name().to_string(),
        started_at,
    })
}

/// Runs `spec` through `runner`, streaming output lines to `consumer`.
///
/// A timeout tears the session down and yields [`ExecError::Timeout`];
/// cancellation yields an outcome with `cancelled` set.
pub async fn run_command(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    consumer: &mut dyn LineConsumer,
    cancel: CancellationToken,
) -> Result<RunOutcome, ExecError> {
    start_command(runner, spec).await?.finish(consumer, cancel).await
}

/// [`run_command`] without external cancellation, returning the exit code.
pub async fn execute(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    consumer: &mut dyn LineConsumer,
) -> Result<i32, ExecError> {
    run_command(runner, spec, consumer, CancellationToken::new())
        .await
        .map(|o| o.exit_code)
}

async fn drive(
    session: &mut dyn RunnerSession,
    spec: &CommandSpec,
    consumer: &mut dyn LineConsumer,
    cancel: &CancellationToken,
    started_at: Instant,
) -> Result<RunOutcome, ExecError> {
    let filter = LineFilter::hiding(spec.password.clone());
    let (line_tx, mut line_rx) = mpsc::channel::<LineTap>(LINE_CHANNEL_CAPACITY);
    let mut pumps = Vec::with_capacity(2);
    if let Some(out) = session.stdout() {
        pumps.push(io_pump::pump(out, LineStream::Stdout, filter.clone(), line_tx.clone()));
    }
    if let Some(err) = session.stderr() {
        pumps.push(io_pump::pump(err, LineStream::Stderr, filter, line_tx.clone()));
    }
    drop(line_tx);

    // The password goes in once, right after connecting; stdin is closed
    // afterwards so nothing waits on more input.
    if let Some(mut stdin) = session.stdin() {
        if let (true, Some(password)) = (spec.is_super_user(), spec.password.as_deref()) {
            let payload = format!("{password}\n");
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                tracing::warn!(
                    host = %spec.host,
                    error = %e,
                    "could not hand sudo password to session"
                );
            }
            let _ = stdin.flush().await;
        }
    }

    let deadline = spec.timeout;
    let sleep = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(sleep);

    let mut lines = 0u64;
    let mut streams_open = true;
    let stop = {
        let wait_fut = session.wait();
        tokio::pin!(wait_fut);
        loop {
            tokio::select! {
                res = &mut wait_fut => break Stop::Exited(res),
                _ = cancel.cancelled() => break Stop::Cancelled,
                _ = &mut sleep => break Stop::TimedOut(deadline.unwrap_or_default()),
                tap = line_rx.recv(), if streams_open => match tap {
                    Some(tap) => {
                        consumer.consume(&tap.line);
                        lines += 1;
                    }
                    None => streams_open = false,
                },
            }
        }
    };

    let (exit_code, cancelled) = match stop {
        Stop::Exited(res) => (res?, false),
        Stop::TimedOut(d) => {
            session.disconnect().await;
            return Err(ExecError::Timeout(d));
        }
        Stop::Cancelled => {
            let _ = session.signal(super::types::Signal::Interrupt).await;
            session.disconnect().await;
            (session.wait().await.unwrap_or(NO_EXIT_CODE), true)
        }
    };

    // The command is gone; keep reading until both streams are exhausted.
    // A background child can inherit the pipes and hold them open, so the
    // drain is bounded by the grace period and by the command's own deadline.
    let drain = async {
        while let Some(tap) = line_rx.recv().await {
            consumer.consume(&tap.line);
            lines += 1;
        }
    };
    let drained = tokio::select! {
        _ = drain => Drain::Complete,
        _ = tokio::time::sleep(DRAIN_GRACE) => Drain::Abandoned,
        _ = &mut sleep, if !cancelled => Drain::PastDeadline,
    };
    if !matches!(drained, Drain::Complete) {
        for pump in &pumps {
            pump.abort();
        }
        session.disconnect().await;
        if matches!(drained, Drain::PastDeadline) {
            return Err(ExecError::Timeout(deadline.unwrap_or_default()));
        }
        tracing::warn!(
            host = %spec.host,
            exit_code,
            "output still open after the command exited; abandoning it"
        );
        pumps.clear();
    }

    for pump in pumps {
        match pump.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(host = %spec.host, error = %e, "output stream failed"),
            Err(e) => {
                tracing::warn!(host = %spec.host, error = %e, "output pump panicked")
            }
        }
    }

    Ok(RunOutcome {
        exit_code,
        duration_ms: started_at.elapsed().as_millis() as u64,
        lines,
        cancelled,
    })
}
