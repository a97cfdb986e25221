use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::command::CommandSpec;
use super::types::Signal;
use crate::error::ExecError;

/// A started command: a local child process or a remote shell channel.
#[async_trait]
pub trait RunnerSession: Send {
    fn stdin(&mut self) -> Option<Box<dyn AsyncWrite + Unpin + Send>>;
    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>>;
    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>>;
    async fn signal(&mut self, signal: Signal) -> Result<(), ExecError>;
    /// Exit code of the command.
    async fn wait(&mut self) -> Result<i32, ExecError>;
    /// Forcibly tears the session down. Must be safe to call after exit.
    async fn disconnect(&mut self);
    /// Backend handle of the running command, e.g. a pid.
    fn resource_id(&self) -> Option<String> {
        None
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    fn name(&self) -> &str;
    async fn start_session(&self, spec: &CommandSpec) -> Result<Box<dyn RunnerSession>, ExecError>;
    /// Cheap reachability probe.
    async fn can_connect(&self, _host: &str, _user: &str, _password: Option<&str>) -> bool {
        true
    }
    /// Copies a local file or directory tree into `remote_dir` on `host`,
    /// overwriting files that already exist there.
    async fn upload(
        &self,
        _host: &str,
        _user: &str,
        _password: Option<&str>,
        _local: &Path,
        _remote_dir: &str,
    ) -> Result<(), ExecError> {
        Err(ExecError::unsupported(self.name(), "upload"))
    }
}

/// Receives command output line by line as it arrives.
pub trait LineConsumer: Send {
    fn consume(&mut self, line: &str);
}

impl<F> LineConsumer for F
where
    F: FnMut(&str) + Send,
{
    fn consume(&mut self, line: &str) {
        self(line)
    }
}

/// Keeps every line; used where the output itself is the result.
#[derive(Debug, Default, Clone)]
pub struct CollectingConsumer {
    pub lines: Vec<String>,
}

impl LineConsumer for CollectingConsumer {
    fn consume(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}

/// Forwards lines to the log at debug level.
#[derive(Debug, Clone)]
pub struct TracingConsumer {
    pub label: String,
}

impl LineConsumer for TracingConsumer {
    fn consume(&mut self, line: &str) {
        tracing::debug!(target: "geoflow.output", label = %self.label, "{line}");
    }
}
