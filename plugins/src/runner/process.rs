use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use geoflow_core::error::ExecError;
use geoflow_core::runner::{CommandRunner, CommandSpec, RunnerSession, Signal, NO_EXIT_CODE};

/// Runs commands on this host through `sh -c`, inheriting the environment.
///
/// Each shell leads its own process group; signals and teardown address the
/// group so pipelines and background children go with it.
#[derive(Debug, Clone)]
pub struct LocalProcessRunner {
    shell: String,
}

impl LocalProcessRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }
}

impl Default for LocalProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for LocalProcessRunner {
    fn name(&self) -> &str {
        "process"
    }

    async fn start_session(
        &self,
        spec: &CommandSpec,
    ) -> Result<Box<dyn RunnerSession>, ExecError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(spec.command_line())
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        let child = cmd.spawn().map_err(|e| {
            ExecError::connection(&spec.host, format!("cannot spawn {}: {e}", self.shell))
        })?;
        let group = child.id();
        tracing::debug!(pid = group, "local process started");
        Ok(Box::new(LocalProcessSession { child, group }))
    }
}

struct LocalProcessSession {
    child: Child,
    /// Pid of the shell, which is also the id of its process group.
    group: Option<u32>,
}

impl LocalProcessSession {
    async fn kill_group(&self) {
        if let Some(group) = self.group {
            if let Err(e) = signal_process_group(&group.to_string(), Signal::Kill).await {
                tracing::debug!(pid = group, error = %e, "process group already gone");
            }
        }
    }
}

/// Sends `signal` through `kill` to the process group led by `pid`.
pub async fn signal_process_group(pid: &str, signal: Signal) -> Result<(), ExecError> {
    let status = Command::new("kill")
        .arg(format!("-{}", signal.number()))
        .arg("--")
        .arg(format!("-{pid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(ExecError::Execution(format!(
            "kill -{} -{pid} exited with {}",
            signal.number(),
            status.code().unwrap_or(NO_EXIT_CODE)
        )))
    }
}

#[async_trait]
impl RunnerSession for LocalProcessSession {
    fn stdin(&mut self) -> Option<Box<dyn AsyncWrite + Unpin + Send>> {
        self.child
            .stdin
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncWrite + Unpin + Send>)
    }

    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    async fn signal(&mut self, signal: Signal) -> Result<(), ExecError> {
        if signal == Signal::Kill {
            self.kill_group().await;
            let _ = self.child.kill().await;
            return Ok(());
        }
        match self.child.id() {
            Some(pid) => signal_process_group(&pid.to_string(), signal).await,
            None => Ok(()),
        }
    }

    async fn wait(&mut self) -> Result<i32, ExecError> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(NO_EXIT_CODE))
    }

    /// Kills what is left of the group even after the shell exited, since a
    /// background child may still hold the output pipes.
    async fn disconnect(&mut self) {
        self.kill_group().await;
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }

    fn resource_id(&self) -> Option<String> {
        self.child.id().map(|pid| pid.to_string())
    }
}
