#[allow(clippy::module_inception)]
pub mod error;
pub mod topology;

pub use error::{CliError, ExecError};
pub use topology::{TopologyError, TopologyOp};
