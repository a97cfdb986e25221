//! Capability-based dispatch of tasks to execution backends.

mod monitor;
mod registry;
mod reporter;
mod traits;

pub use monitor::spawn_monitor;
pub use registry::{Dispatcher, ExecutorRegistry};
pub use reporter::{exit_status, ProgressConsumer, TaskReporter};
pub use traits::BackendExecutor;
