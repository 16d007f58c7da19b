//! Snapclient process supervision.
//!
//! Owns at most one client process: spawn with a settle check, graceful-then-forced
//! stop, and liveness probing against the OS process table.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use source_hub_types::DEFAULT_SNAPCAST_PORT;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};

const SETTLE_DELAY: Duration = Duration::from_millis(500);
const TERM_TIMEOUT: Duration = Duration::from_secs(2);
const KILL_TIMEOUT: Duration = Duration::from_secs(1);
const STDERR_READ_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("executable {path} unavailable: {reason}")]
    ExecutableUnavailable { path: String, reason: String },
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("client exited immediately (code {code:?}): {stderr}")]
    ExitedEarly { code: Option<i32>, stderr: String },
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was tracked (or it had already exited).
    NotRunning,
    /// Exited after SIGTERM.
    Terminated,
    /// Needed SIGKILL.
    Killed,
    /// Still not reaped after SIGKILL; handle dropped anyway.
    Unresponsive,
}

/// Process control used by the connection logic.
#[async_trait]
pub trait ClientProcess: Send {
    /// Whether the configured binary exists and is executable. Logs the reason on failure.
    fn check_executable(&self) -> bool;

    /// Start the client against `host:port`, replacing any running process.
    async fn start(&mut self, host: &str, port: u16) -> Result<u32, ProcessError>;

    /// Stop the tracked process. Idempotent.
    async fn stop(&mut self) -> StopOutcome;

    /// Authoritative liveness check; clears stale bookkeeping when the process is gone.
    async fn is_running(&mut self) -> bool;

    fn pid(&self) -> Option<u32>;
}

pub struct ProcessSupervisor {
    executable: PathBuf,
    alsa_device: String,
    extra_args: Vec<String>,
    sweep_name: Option<String>,
    settle_delay: Duration,
    term_timeout: Duration,
    kill_timeout: Duration,
    child: Option<Child>,
    pid: Option<u32>,
    host: Option<String>,
}

impl ProcessSupervisor {
    pub fn new(executable: PathBuf, alsa_device: String, extra_args: Vec<String>) -> Self {
        let sweep_name = executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Self {
            executable,
            alsa_device,
            extra_args,
            sweep_name,
            settle_delay: SETTLE_DELAY,
            term_timeout: TERM_TIMEOUT,
            kill_timeout: KILL_TIMEOUT,
            child: None,
            pid: None,
            host: None,
        }
    }

    /// Skip the system-wide `killall` sweep after stop.
    #[cfg(test)]
    pub fn without_sweep(mut self) -> Self {
        self.sweep_name = None;
        self
    }

    #[cfg(test)]
    pub fn with_timeouts(mut self, settle: Duration, term: Duration, kill: Duration) -> Self {
        self.settle_delay = settle;
        self.term_timeout = term;
        self.kill_timeout = kill;
        self
    }

    /// Host the current process was started against.
    #[cfg(test)]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Arguments passed to the client for `host:port`.
    pub fn build_args(&self, host: &str, port: u16) -> Vec<String> {
        let mut args = vec![
            "-h".to_string(),
            host.to_string(),
            "-s".to_string(),
            self.alsa_device.clone(),
        ];
        if port != DEFAULT_SNAPCAST_PORT {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn ensure_executable(&self) -> Result<(), ProcessError> {
        let unavailable = |reason: &str| ProcessError::ExecutableUnavailable {
            path: self.executable.display().to_string(),
            reason: reason.to_string(),
        };
        let meta = std::fs::metadata(&self.executable).map_err(|e| unavailable(&e.to_string()))?;
        if !meta.is_file() {
            return Err(unavailable("not a regular file"));
        }
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(unavailable("not executable"));
        }
        Ok(())
    }

    fn release(&mut self) {
        self.child = None;
        self.pid = None;
        self.host = None;
    }

    async fn sweep(&self) {
        let Some(name) = self.sweep_name.as_deref() else {
            return;
        };
        let run = Command::new("killall")
            .arg("-KILL")
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(self.term_timeout, run).await {
            Ok(Ok(output)) if output.status.success() => {
                tracing::warn!(name = %name, "cleanup sweep killed stray client processes");
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
                if !stderr.contains("no process found") && !stderr.trim().is_empty() {
                    tracing::warn!(
                        name = %name,
                        code = ?output.status.code(),
                        stderr = %stderr.trim(),
                        "cleanup sweep failed"
                    );
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("killall not found; stray client processes cannot be swept");
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "cleanup sweep failed"),
            Err(_) => tracing::warn!(name = %name, "cleanup sweep timed out"),
        }
    }
}

#[async_trait]
impl ClientProcess for ProcessSupervisor {
    fn check_executable(&self) -> bool {
        match self.ensure_executable() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "snapclient executable check failed");
                false
            }
        }
    }

    async fn start(&mut self, host: &str, port: u16) -> Result<u32, ProcessError> {
        if self.child.is_some() {
            tracing::info!(pid = ?self.pid, "replacing running snapclient process");
            self.stop().await;
        }
        self.ensure_executable()?;

        let args = self.build_args(host, port);
        tracing::info!(
            exe = %self.executable.display(),
            args = ?args,
            "starting snapclient"
        );
        let mut child = Command::new(&self.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                path: self.executable.display().to_string(),
                source,
            })?;

        tokio::time::sleep(self.settle_delay).await;

        if let Ok(Some(status)) = child.try_wait() {
            let stderr = match child.stderr.take() {
                Some(stream) => read_remaining(stream).await,
                None => String::new(),
            };
            tracing::error!(code = ?status.code(), stderr = %stderr, "snapclient exited immediately");
            return Err(ProcessError::ExitedEarly {
                code: status.code(),
                stderr,
            });
        }

        let pid = child.id().unwrap_or_default();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_output(stdout, pid, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_output(stderr, pid, "stderr"));
        }
        tracing::info!(pid, host = %host, "snapclient started");
        self.child = Some(child);
        self.pid = Some(pid);
        self.host = Some(host.to_string());
        Ok(pid)
    }

    async fn stop(&mut self) -> StopOutcome {
        let outcome = match self.child.take() {
            None => StopOutcome::NotRunning,
            Some(mut child) => match child.try_wait() {
                Ok(Some(_)) => StopOutcome::NotRunning,
                _ => {
                    let pid = child.id();
                    tracing::info!(pid = ?pid, host = ?self.host, "stopping snapclient");
                    if let Some(pid) = pid {
                        send_signal(pid, libc::SIGTERM);
                    }
                    match tokio::time::timeout(self.term_timeout, child.wait()).await {
                        Ok(_) => StopOutcome::Terminated,
                        Err(_) => {
                            tracing::warn!(pid = ?pid, "snapclient ignored SIGTERM; sending SIGKILL");
                            let _ = child.start_kill();
                            match tokio::time::timeout(self.kill_timeout, child.wait()).await {
                                Ok(_) => StopOutcome::Killed,
                                Err(_) => {
                                    tracing::error!(pid = ?pid, "snapclient did not exit after SIGKILL");
                                    StopOutcome::Unresponsive
                                }
                            }
                        }
                    }
                }
            },
        };
        self.release();
        self.sweep().await;
        outcome
    }

    async fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::warn!(pid = ?self.pid, code = ?status.code(), "snapclient exited");
                self.release();
                return false;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "snapclient wait check failed"),
        }
        let alive = self.pid.is_some_and(pid_alive);
        if !alive {
            tracing::warn!(pid = ?self.pid, "snapclient missing from process table; cleaning up");
            self.stop().await;
        }
        alive
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

fn send_signal(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        tracing::debug!(pid, signal, error = %std::io::Error::last_os_error(), "kill failed");
    }
}

/// `kill(pid, 0)` probe; EPERM still means the process exists.
fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

async fn read_remaining<R: AsyncRead + Unpin>(mut stream: R) -> String {
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(STDERR_READ_TIMEOUT, stream.read_to_end(&mut buf)).await;
    String::from_utf8_lossy(&buf).trim().to_string()
}

async fn drain_output<R: AsyncRead + Unpin>(stream: R, pid: u32, label: &'static str) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(pid, stream = label, "snapclient: {line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(pid, stream = label, error = %e, "snapclient output closed");
                break;
            }
        }
    }
}

/// Test helper shared with other snapclient modules.
#[cfg(test)]
pub(crate) fn write_script(tag: &str, body: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "source-hub-process-{tag}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("fake-snapclient");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}
