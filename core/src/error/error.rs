use thiserror::Error;

use super::topology::TopologyError;
use crate::state::TransitionError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("execution failed: {0}")]
    Exec(#[from] ExecError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Errors raised by the orchestration core.
///
/// `Connection` and `Timeout` are backend-level and retryable; everything else
/// is final for the call that produced it.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("authentication failed for {user}@{host}")]
    Authentication { host: String, user: String },

    #[error("operation '{operation}' is not supported by backend '{backend}'")]
    UnsupportedOperation {
        backend: String,
        operation: &'static str,
    },

    #[error("execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("queue state error: {0}")]
    QueueState(String),

    #[error("no executor found for component '{0}'")]
    NoExecutorFound(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("transition rejected: {0}")]
    Transition(#[from] TransitionError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("stream io error: {stream} {source}")]
    StreamIo {
        stream: &'static str,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    pub fn connection(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported(backend: impl Into<String>, operation: &'static str) -> Self {
        Self::UnsupportedOperation {
            backend: backend.into(),
            operation,
        }
    }

    /// Whether the failed call may be attempted again (possibly on another node).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout(_))
    }

    /// Credential errors disable a node until an operator fixes them.
    pub fn is_fatal_for_node(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}
