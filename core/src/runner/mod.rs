//! Remote command executor: runs an argument vector on a host and streams its
//! output while it runs.

pub mod command;
mod io_pump;
pub mod runtime;
mod traits;
pub mod types;

pub use command::{
    insert_sudo_params, is_separator, quote_arg, shell_quote, split_command, tokenize_args,
    CommandSpec, ExecutionMode, SHELL_COMMAND_SEPARATORS, SUDO_PREFIX,
};
pub use io_pump::{LineFilter, LineStream, LineTap};
pub use runtime::{execute, run_command, start_command, RunningCommand};
pub use traits::{CollectingConsumer, LineConsumer, CommandRunner, RunnerSession, TracingConsumer};
pub use types::{RunOutcome, Signal, NO_EXIT_CODE};
