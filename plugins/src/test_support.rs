//! Scripted command runner for unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use geoflow_core::error::ExecError;
use geoflow_core::runner::{CommandRunner, CommandSpec, RunnerSession, Signal};

/// Answers each command with the first rule whose needle occurs in the
/// command line; unmatched commands exit 0 silently.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Vec<(String, Result<(i32, String), String>)>,
    pub(crate) calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub(crate) fn reply(mut self, needle: &str, exit_code: i32, output: &str) -> Self {
        self.rules.push((needle.to_string(), Ok((exit_code, output.to_string()))));
        self
    }

    pub(crate) fn unreachable(mut self, needle: &str) -> Self {
        self.rules.push((needle.to_string(), Err("no route to host".to_string())));
        self
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.command_line()).collect()
    }

    pub(crate) fn count(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start_session(&self, spec: &CommandSpec) -> Result<Box<dyn RunnerSession>, ExecError> {
        self.calls.lock().unwrap().push(spec.clone());
        let line = spec.command_line();
        let answer = self
            .rules
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, answer)| answer.clone())
            .unwrap_or(Ok((0, String::new())));
        match answer {
            Ok((exit_code, output)) => Ok(Box::new(ScriptedSession {
                exit_code,
                output: Some(output.into_bytes()),
            })),
            Err(reason) => Err(ExecError::connection(&spec.host, reason)),
        }
    }
}

struct ScriptedSession {
    exit_code: i32,
    output: Option<Vec<u8>>,
}

#[async_trait]
impl RunnerSession for ScriptedSession {
    fn stdin(&mut self) -> Option<Box<dyn AsyncWrite + Unpin + Send>> {
        Some(Box::new(tokio::io::sink()))
    }

    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.output
            .take()
            .map(|bytes| Box::new(std::io::Cursor::new(bytes)) as Box<dyn AsyncRead + Unpin + Send>)
    }

    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        None
    }

    async fn signal(&mut self, _signal: Signal) -> Result<(), ExecError> {
        Ok(())
    }

    async fn wait(&mut self) -> Result<i32, ExecError> {
        Ok(self.exit_code)
    }

    async fn disconnect(&mut self) {}
}
