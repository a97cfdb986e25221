//! Execution orchestration core for geospatial processing pipelines.
//!
//! Jobs are trees of tasks held in an arena and driven through a status
//! machine; a fair per-user queue feeds the orchestrator, which dispatches
//! leaf tasks to pluggable backends by capability.

pub mod config;
pub mod container;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod model;
pub mod persistence;
pub mod queue;
pub mod runner;
pub mod state;
pub mod topology;

pub use context::{AppContext, BackendDeps, BackendFactory, Services};
pub use error::{CliError, ExecError, TopologyError};
