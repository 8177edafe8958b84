//! Spawning and owning a child process.
//!
//! [`ManagedProcess`] owns the OS child from spawn until it has been reaped.
//! Dropping it while the child is still running performs the same teardown as
//! [`ManagedProcess::terminate`]: SIGTERM, bounded wait, SIGKILL.

use std::fmt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use harness_common::{ProcessError, ProcessIdentity, ProcessResult};
use nix::unistd::{getpgid, Pid};
use tracing::{debug, error, info, warn};
use wait_timeout::ChildExt;

use crate::terminate::terminate_gracefully;

/// Default time a process gets to exit after SIGTERM.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything needed to start a child process.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Applied on top of the inherited environment, in order.
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// Make the child the leader of a new process group.
    pub new_process_group: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn new_process_group(mut self, enabled: bool) -> Self {
        self.new_process_group = enabled;
        self
    }

    /// Last value set for `key`, if any.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Build the `std::process::Command`. Stdout and stderr are inherited so
    /// server output lands in the test log.
    pub fn to_command(&self) -> Command {
        use std::os::unix::process::CommandExt;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        if self.new_process_group {
            cmd.process_group(0);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A spawned child owned until it is reaped.
pub struct ManagedProcess {
    id: String,
    child: Child,
    identity: ProcessIdentity,
    exit_status: Option<ExitStatus>,
    shutdown_timeout: Duration,
}

impl ManagedProcess {
    /// Spawn `spec`; `id` names the process in logs and errors.
    pub fn spawn(id: impl Into<String>, spec: &CommandSpec) -> ProcessResult<Self> {
        let id = id.into();
        info!("Spawning process {}: {}", id, spec);

        let child = spec
            .to_command()
            .spawn()
            .map_err(|e| ProcessError::spawn_failed(id.clone(), format!("{}: {}", spec.program.display(), e)))?;

        let pid = child.id();
        let pgid = if spec.new_process_group {
            pid
        } else {
            getpgid(Some(Pid::from_raw(pid as i32)))
                .map(|p| p.as_raw() as u32)
                .unwrap_or_else(|_| nix::unistd::getpgrp().as_raw() as u32)
        };

        info!("Process spawned successfully: {} (PID: {}, PGID: {})", id, pid, pgid);

        Ok(Self {
            id,
            child,
            identity: ProcessIdentity { pid, pgid },
            exit_status: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        })
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> u32 {
        self.identity.pid
    }

    pub fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    /// Exit status if the child has exited; never blocks.
    pub fn try_exit_status(&mut self) -> ProcessResult<Option<ExitStatus>> {
        if self.exit_status.is_none() {
            self.exit_status = self
                .child
                .try_wait()
                .map_err(|e| ProcessError::wait_failed(self.id.clone(), e.to_string()))?;
        }
        Ok(self.exit_status)
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.try_exit_status(), Ok(None))
    }

    /// Block up to `timeout` for the child to exit.
    pub fn wait_timeout(&mut self, timeout: Duration) -> ProcessResult<Option<ExitStatus>> {
        if self.exit_status.is_none() {
            self.exit_status = self
                .child
                .wait_timeout(timeout)
                .map_err(|e| ProcessError::wait_failed(self.id.clone(), e.to_string()))?;
        }
        Ok(self.exit_status)
    }

    /// SIGTERM, wait up to the shutdown timeout, then SIGKILL and reap.
    ///
    /// Idempotent: once the child has been reaped the stored status is
    /// returned.
    pub fn terminate(&mut self) -> ProcessResult<ExitStatus> {
        if let Some(status) = self.try_exit_status()? {
            debug!("Process {} already exited: {}", self.id, status);
            return Ok(status);
        }

        info!("Sending termination signal to {} (PID {})", self.id, self.pid());
        if let Err(e) = terminate_gracefully(self.pid()) {
            // Raced with the child exiting on its own; the wait below reaps it.
            warn!("Failed to send SIGTERM to {}: {}", self.id, e);
        }

        if let Some(status) = self.wait_timeout(self.shutdown_timeout)? {
            info!("Process terminated gracefully: {} ({})", self.id, status);
            return Ok(status);
        }

        warn!(
            "Graceful shutdown timed out for {} (PID: {}) after {:?}, forcing kill",
            self.id,
            self.pid(),
            self.shutdown_timeout
        );
        self.child
            .kill()
            .map_err(|e| ProcessError::stop_failed(self.id.clone(), format!("kill failed: {}", e)))?;
        let status = self
            .child
            .wait()
            .map_err(|e| ProcessError::wait_failed(self.id.clone(), e.to_string()))?;
        self.exit_status = Some(status);
        info!("Process terminated after force kill: {} ({})", self.id, status);
        Ok(status)
    }
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("exit_status", &self.exit_status)
            .finish()
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.exit_status.is_some() {
            return;
        }
        if let Err(e) = self.terminate() {
            error!("Failed to terminate {} on drop: {}", self.id, e);
        }
    }
}
