use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, Command};
use tokio::sync::Notify;

use geoflow_core::config::RemoteConfig;
use geoflow_core::error::ExecError;
use geoflow_core::runner::{
    shell_quote, CommandRunner, CommandSpec, RunnerSession, Signal, NO_EXIT_CODE,
};

/// `ssh` exit code for connection-level failures.
const SSH_CONNECTION_FAILURE: i32 = 255;
/// `sshpass` exit codes. The remote command's own code passes through
/// unchanged, so these only mean something next to a client diagnostic.
const SSHPASS_BAD_PASSWORD: i32 = 5;
const SSHPASS_HOST_KEY_UNKNOWN: i32 = 6;

/// Client-side messages that mark a failure as the connection's, not the
/// remote command's.
/// A bare "Permission denied" is also what sftp reports for a remote path.
const AUTH_DIAGNOSTICS: [&str; 3] = [
    "Permission denied (",
    "Permission denied, please try again",
    "Authentication failed",
];
const HOST_KEY_DIAGNOSTICS: [&str; 3] = [
    "Host key verification failed",
    "authenticity of host",
    "REMOTE HOST IDENTIFICATION HAS CHANGED",
];
const CONNECTION_DIAGNOSTICS: [&str; 10] = [
    "ssh:",
    "sshpass:",
    "Connection refused",
    "Connection closed",
    "Connection reset",
    "Connection timed out",
    "Could not resolve hostname",
    "No route to host",
    "kex_exchange_identification",
    "Broken pipe",
];

const STDERR_TAIL_BYTES: usize = 4096;
const STDERR_SETTLE: Duration = Duration::from_millis(500);

/// Runs commands on remote hosts through the system `ssh` client.
///
/// With a login password the client is wrapped in `sshpass -e` and the
/// password travels in `SSHPASS`, never on the command line. Super-user
/// commands get a PTY so `sudo -S` can read the password written to stdin.
#[derive(Debug, Clone)]
pub struct SshRunner {
    cfg: RemoteConfig,
}

/// Program, arguments and extra environment of one `ssh` or `sftp` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub uses_password: bool,
}

impl SshRunner {
    pub fn new(cfg: RemoteConfig) -> Self {
        Self { cfg }
    }

    pub fn invocation(&self, spec: &CommandSpec) -> SshInvocation {
        self.invocation_for(
            &spec.host,
            &spec.user,
            spec.password.is_some(),
            spec.is_super_user(),
            remote_command_line(spec),
        )
    }

    fn invocation_for(
        &self,
        host: &str,
        user: &str,
        with_password: bool,
        pty: bool,
        command_line: String,
    ) -> SshInvocation {
        let mut args = Vec::new();
        let program = if with_password {
            args.push("-e".to_string());
            args.push(self.cfg.ssh_bin.clone());
            self.cfg.sshpass_bin.clone()
        } else {
            self.cfg.ssh_bin.clone()
        };
        let strict = if self.cfg.strict_host_key_checking { "yes" } else { "no" };
        args.extend([
            "-o".to_string(),
            format!("ConnectTimeout={}", self.cfg.connect_timeout_secs),
            "-o".to_string(),
            format!("StrictHostKeyChecking={strict}"),
            "-p".to_string(),
            self.cfg.port.to_string(),
        ]);
        if !with_password {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        if pty {
            args.push("-tt".to_string());
        }
        if user.is_empty() {
            args.push(host.to_string());
        } else {
            args.push(format!("{user}@{host}"));
        }
        args.push("--".to_string());
        args.push(command_line);
        SshInvocation {
            program,
            args,
            uses_password: with_password,
        }
    }

    /// `sftp` reading its batch from stdin. An explicit `BatchMode=no` ahead
    /// of `-b` keeps password authentication available to `sshpass`.
    pub fn sftp_invocation(&self, host: &str, user: &str, with_password: bool) -> SshInvocation {
        let mut args = Vec::new();
        let program = if with_password {
            args.push("-e".to_string());
            args.push(self.cfg.sftp_bin.clone());
            self.cfg.sshpass_bin.clone()
        } else {
            self.cfg.sftp_bin.clone()
        };
        let strict = if self.cfg.strict_host_key_checking { "yes" } else { "no" };
        let batch_mode = if with_password { "no" } else { "yes" };
        args.extend([
            "-o".to_string(),
            format!("ConnectTimeout={}", self.cfg.connect_timeout_secs),
            "-o".to_string(),
            format!("StrictHostKeyChecking={strict}"),
            "-P".to_string(),
            self.cfg.port.to_string(),
            "-o".to_string(),
            format!("BatchMode={batch_mode}"),
            "-b".to_string(),
            "-".to_string(),
        ]);
        if user.is_empty() {
            args.push(host.to_string());
        } else {
            args.push(format!("{user}@{host}"));
        }
        SshInvocation {
            program,
            args,
            uses_password: with_password,
        }
    }

    fn command(&self, invocation: &SshInvocation, password: Option<&str>) -> Command {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let (true, Some(password)) = (invocation.uses_password, password) {
            cmd.env("SSHPASS", password);
        }
        cmd
    }
}

/// Command line executed by the remote shell: working directory and
/// environment first, then the (possibly sudo-rewritten) command.
fn remote_command_line(spec: &CommandSpec) -> String {
    let mut line = String::new();
    for (key, value) in &spec.env {
        line.push_str(&format!("export {key}={}; ", shell_quote(value)));
    }
    if let Some(dir) = &spec.working_dir {
        line.push_str(&format!("cd {} && ", shell_quote(&dir.to_string_lossy())));
    }
    line.push_str(&spec.command_line());
    line
}

/// `sftp` batch commands copying `local` into `remote_dir`.
///
/// Directories are recreated (`-mkdir` tolerates existing ones) and walked in
/// name order; hidden entries below the top level are skipped. `put`
/// overwrites files already present.
pub fn upload_batch(local: &Path, remote_dir: &str) -> io::Result<Vec<String>> {
    let mut batch = Vec::new();
    push_upload(local, remote_dir.trim_end_matches('/'), &mut batch)?;
    Ok(batch)
}

fn push_upload(local: &Path, remote_parent: &str, batch: &mut Vec<String>) -> io::Result<()> {
    let name = local.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", local.display()),
        )
    })?;
    let target = format!("{remote_parent}/{}", name.to_string_lossy());
    if !std::fs::metadata(local)?.is_dir() {
        batch.push(format!(
            "put {} {}",
            batch_quote(&local.to_string_lossy()),
            batch_quote(&target)
        ));
        return Ok(());
    }
    batch.push(format!("-mkdir {}", batch_quote(&target)));
    let mut entries = std::fs::read_dir(local)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<PathBuf>>>()?;
    entries.sort();
    for entry in entries {
        let hidden = entry
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'));
        if !hidden {
            push_upload(&entry, &target, batch)?;
        }
    }
    Ok(())
}

fn batch_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl CommandRunner for SshRunner {
    fn name(&self) -> &str {
        "ssh"
    }

    async fn start_session(
        &self,
        spec: &CommandSpec,
    ) -> Result<Box<dyn RunnerSession>, ExecError> {
        let invocation = self.invocation(spec);
        let mut child = self
            .command(&invocation, spec.password.as_deref())
            .spawn()
            .map_err(|e| cannot_spawn(&spec.host, &invocation, e))?;
        let tail = Arc::new(StderrTail::default());
        let stderr = child.stderr.take().map(|inner| StderrWatch {
            inner,
            tail: tail.clone(),
        });
        Ok(Box::new(SshSession {
            child,
            stderr,
            tail,
            host: spec.host.clone(),
            user: spec.user.clone(),
            uses_password: invocation.uses_password,
        }))
    }

    async fn can_connect(&self, host: &str, user: &str, password: Option<&str>) -> bool {
        let invocation =
            self.invocation_for(host, user, password.is_some(), false, "exit 0".to_string());
        let mut cmd = self.command(&invocation, password);
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        let limit = Duration::from_secs(self.cfg.connect_timeout_secs.saturating_add(2));
        match tokio::time::timeout(limit, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!(host, error = %e, "ssh probe could not start");
                false
            }
            Err(_) => false,
        }
    }

    async fn upload(
        &self,
        host: &str,
        user: &str,
        password: Option<&str>,
        local: &Path,
        remote_dir: &str,
    ) -> Result<(), ExecError> {
        let batch = upload_batch(local, remote_dir)?;
        let invocation = self.sftp_invocation(host, user, password.is_some());
        tracing::debug!(
            host,
            local = %local.display(),
            remote_dir,
            commands = batch.len(),
            "starting sftp upload"
        );
        let mut child = self
            .command(&invocation, password)
            .spawn()
            .map_err(|e| cannot_spawn(host, &invocation, e))?;
        if let Some(mut stdin) = child.stdin.take() {
            let script = format!("{}\n", batch.join("\n"));
            // A client that fails to connect exits without reading its batch.
            if let Err(e) = stdin.write_all(script.as_bytes()).await {
                tracing::debug!(host, error = %e, "sftp batch not fully written");
            }
        }
        let output = child.wait_with_output().await?;
        if output.status.success() {
            tracing::info!(host, local = %local.display(), remote_dir, "upload finished");
            return Ok(());
        }
        let code = output.status.code().unwrap_or(NO_EXIT_CODE);
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Everything on sftp's stderr comes from the client itself.
        if let Some(err) = diagnose(host, user, &stderr) {
            return Err(err);
        }
        Err(ExecError::Execution(format!(
            "sftp upload to {host} exited with {code}: {}",
            stderr.trim()
        )))
    }
}

fn cannot_spawn(host: &str, invocation: &SshInvocation, e: io::Error) -> ExecError {
    ExecError::connection(host, format!("cannot spawn {}: {e}", invocation.program))
}

#[derive(Default)]
struct StderrTail {
    text: Mutex<String>,
    done: AtomicBool,
    eof: Notify,
}

impl StderrTail {
    fn push(&self, bytes: &[u8]) {
        let mut text = self.text.lock().unwrap_or_else(|p| p.into_inner());
        text.push_str(&String::from_utf8_lossy(bytes));
        if text.len() > STDERR_TAIL_BYTES {
            let mut cut = text.len() - STDERR_TAIL_BYTES;
            while !text.is_char_boundary(cut) {
                cut += 1;
            }
            text.drain(..cut);
        }
    }

    fn close(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.eof.notify_waiters();
    }

    async fn closed(&self) {
        loop {
            let notified = self.eof.notified();
            if self.done.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    fn snapshot(&self) -> String {
        self.text.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Passes stderr through while keeping its tail for failure classification.
struct StderrWatch<R> {
    inner: R,
    tail: Arc<StderrTail>,
}

impl<R: AsyncRead + Unpin> AsyncRead for StderrWatch<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let fresh = &buf.filled()[before..];
            if fresh.is_empty() {
                this.tail.close();
            } else {
                this.tail.push(fresh);
            }
        }
        poll
    }
}

struct SshSession {
    child: Child,
    stderr: Option<StderrWatch<tokio::process::ChildStderr>>,
    tail: Arc<StderrTail>,
    host: String,
    user: String,
    uses_password: bool,
}

impl SshSession {
    /// Exit codes the client itself may have produced.
    fn is_client_code(&self, code: i32) -> bool {
        let sshpass_code = code == SSHPASS_BAD_PASSWORD || code == SSHPASS_HOST_KEY_UNKNOWN;
        code == SSH_CONNECTION_FAILURE || (self.uses_password && sshpass_code)
    }

    /// Maps a client exit code to a connection-level error, but only when
    /// stderr carries the client's diagnostic; otherwise the code belongs to
    /// the remote command.
    fn classify(&self, code: i32, stderr: &str) -> Option<ExecError> {
        if !self.is_client_code(code) {
            return None;
        }
        diagnose(&self.host, &self.user, stderr)
    }
}

/// Authentication or connection error named by a client diagnostic.
fn diagnose(host: &str, user: &str, stderr: &str) -> Option<ExecError> {
    if diagnostic_line(stderr, &AUTH_DIAGNOSTICS).is_some() {
        return Some(ExecError::Authentication {
            host: host.to_string(),
            user: user.to_string(),
        });
    }
    let line = diagnostic_line(stderr, &HOST_KEY_DIAGNOSTICS)
        .or_else(|| diagnostic_line(stderr, &CONNECTION_DIAGNOSTICS))?;
    Some(ExecError::connection(host, line))
}

/// Last stderr line containing one of `markers`.
fn diagnostic_line(stderr: &str, markers: &[&str]) -> Option<String> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| markers.iter().any(|m| l.contains(m)))
        .map(str::to_string)
}

#[async_trait]
impl RunnerSession for SshSession {
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
        self.stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    /// Signals the local client; remote processes are signalled by running
    /// `kill` through a separate session.
    async fn signal(&mut self, signal: Signal) -> Result<(), ExecError> {
        match signal {
            Signal::Kill | Signal::Interrupt => {
                let _ = self.child.start_kill();
                Ok(())
            }
            Signal::Suspend | Signal::Resume => {
                Err(ExecError::unsupported("ssh", "signal session"))
            }
        }
    }

    async fn wait(&mut self) -> Result<i32, ExecError> {
        let status = self.child.wait().await?;
        let code = status.code().unwrap_or(NO_EXIT_CODE);
        if self.is_client_code(code) {
            // Let the stderr pump reach EOF so the diagnosis sees everything.
            let _ = tokio::time::timeout(STDERR_SETTLE, self.tail.closed()).await;
            if let Some(err) = self.classify(code, &self.tail.snapshot()) {
                tracing::warn!(
                    host = %self.host,
                    user = %self.user,
                    error = %err,
                    "ssh session failed"
                );
                return Err(err);
            }
        }
        Ok(code)
    }

    async fn disconnect(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }
}
