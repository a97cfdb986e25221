//! One-off command execution with live output.
use std::time::Duration;

use geoflow_core::error::CliError;
use geoflow_core::runner::{run_command, CommandSpec, ExecutionMode};
use geoflow_core::AppContext;

use crate::commands::cli::ExecArgs;
use crate::commands::nodes::PASSWORD_ENV;

pub fn command_spec(args: &ExecArgs, default_user: &str) -> CommandSpec {
    let user = args.user.clone().unwrap_or_else(|| default_user.to_string());
    let password = args
        .password
        .clone()
        .or_else(|| std::env::var(PASSWORD_ENV).ok());
    let mode = if args.sudo {
        ExecutionMode::SuperUser
    } else {
        ExecutionMode::User
    };
    CommandSpec::new(&args.host, user, args.args.clone())
        .with_password(password)
        .with_mode(mode)
        .with_timeout(args.timeout_secs.map(Duration::from_secs))
}

pub async fn handle_exec(args: ExecArgs, ctx: &AppContext) -> Result<i32, CliError> {
    let master = ctx.topology().master_node().await;
    let spec = command_spec(&args, &master.user);
    let services = ctx.services();
    let runner = if args.local {
        services.local_runner.clone()
    } else {
        services.remote_runner.clone()
    };

    let cancel = ctx.shutdown_token();
    let interrupt = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut print = |line: &str| println!("{line}");
    let outcome = run_command(runner.as_ref(), &spec, &mut print, cancel).await;
    ctrl_c.abort();

    let outcome = outcome?;
    if outcome.cancelled {
        eprintln!("interrupted");
        return Ok(130);
    }
    Ok(outcome.exit_code)
}
