//! Job execution: the worker loop and its retry and concurrency strategies.

mod command;
mod orchestrator;
pub mod traits;
pub mod types;

pub use command::{CommandBuilder, TemplateCommandBuilder};
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use traits::{ConcurrencyContext, ConcurrencyStrategyPlugin, RetryStrategyPlugin};
pub use types::{ConcurrencyConfig, RetryConfig};
