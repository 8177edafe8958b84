//! The parent side: start a worker, wait for it, clean up its process group,
//! check its exit code.

use std::env;
use std::fmt::{self, Debug};
use std::fs;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{self, Command, ExitStatus};
use std::time::Duration;

use harness_common::{HarnessError, IsolationResult, ProcessError, Result, WorkerExit};
use harness_process::FORCE_KILL_TIMEOUT;
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, getpgrp, setpgid, ForkResult, Pid};
use tracing::{debug, info, warn};

use crate::cleanup::{cleanup_shared_group, cleanup_worker_group};
use crate::worker::{run_body, TestReturn};

/// Set in a re-exec'd worker to the test path it must run.
pub const ISOLATED_WORKER_ENV: &str = "HARNESS_ISOLATED_WORKER";

/// File the re-exec'd worker creates to prove it found its test.
const WORKER_ACK_ENV: &str = "HARNESS_ISOLATED_WORKER_ACK";

/// How the worker process is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerStrategy {
    /// `fork()` the current process; the body runs in the child copy.
    ///
    /// Only the forking thread survives in the child. Bodies that take locks
    /// another test thread may hold at fork time should run with
    /// `--test-threads=1` or use [`WorkerStrategy::Reexec`].
    #[default]
    Fork,
    /// Re-run the current test binary filtered to this one test.
    Reexec,
}

/// Which process group the worker runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupMode {
    /// The worker leads a fresh group; the runner is not in it.
    #[default]
    ChildGroup,
    /// The runner leads a new group and the worker joins it. Cleanup
    /// broadcasts to the runner's own group while SIGTERM is ignored.
    SharedGroup,
}

/// Lifecycle of one isolated run. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IsolationState {
    NotStarted,
    ChildRunning,
    ChildExited,
    GroupCleaned,
    Asserted,
}

struct Lifecycle<'a> {
    test: &'a str,
    state: IsolationState,
}

impl<'a> Lifecycle<'a> {
    fn new(test: &'a str) -> Self {
        Self {
            test,
            state: IsolationState::NotStarted,
        }
    }

    fn advance(&mut self, next: IsolationState) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        debug!("{}: {:?} -> {:?}", self.test, self.state, next);
        self.state = next;
    }
}

/// A test body to run in its own process.
#[derive(Debug, Clone)]
pub struct IsolatedTest {
    name: String,
    args: String,
    strategy: WorkerStrategy,
    group_mode: GroupMode,
    cleanup_grace: Duration,
}

impl IsolatedTest {
    /// `name` must be the libtest path of the calling test (see
    /// [`test_path`]) when the re-exec strategy is used.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: "()".to_string(),
            strategy: WorkerStrategy::default(),
            group_mode: GroupMode::default(),
            cleanup_grace: FORCE_KILL_TIMEOUT,
        }
    }

    /// Arguments the body was parameterized with, for failure messages.
    pub fn with_args<A: Debug + ?Sized>(mut self, args: &A) -> Self {
        self.args = format!("{:?}", args);
        self
    }

    pub fn strategy(mut self, strategy: WorkerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn group_mode(mut self, mode: GroupMode) -> Self {
        self.group_mode = mode;
        self
    }

    /// Time leftover group members get between SIGTERM and SIGKILL.
    pub fn cleanup_grace(mut self, grace: Duration) -> Self {
        self.cleanup_grace = grace;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `body` in a worker and clean up after it. Does not judge the exit
    /// status; see [`IsolatedTest::run_and_assert`].
    ///
    /// Bodies that only panic, [`skip`](crate::skip) or abort are accepted
    /// here as they are. For bodies returning `Result` use
    /// [`IsolatedTest::run_returning`].
    pub fn run<F: FnOnce()>(&self, body: F) -> Result<IsolationResult> {
        self.run_returning(body)
    }

    /// Like [`IsolatedTest::run`] for bodies returning `()` or
    /// `Result<(), E>`; an `Err` fails the worker.
    pub fn run_returning<F, R>(&self, body: F) -> Result<IsolationResult>
    where
        F: FnOnce() -> R,
        R: TestReturn,
    {
        if self.is_reexec_worker() {
            self.acknowledge_worker();
            process::exit(run_body(&self.name, body));
        }

        let mut lifecycle = Lifecycle::new(&self.name);

        if self.group_mode == GroupMode::SharedGroup {
            setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(|e| {
                ProcessError::signal_failed("self", "setpgid", e.to_string())
            })?;
        }

        info!("Running {} in an isolated worker ({:?}, {:?})", self.name, self.strategy, self.group_mode);
        let (exit, pgid) = match self.strategy {
            WorkerStrategy::Fork => self.run_forked(body, &mut lifecycle)?,
            WorkerStrategy::Reexec => {
                drop(body);
                self.run_reexec(&mut lifecycle)?
            }
        };
        lifecycle.advance(IsolationState::ChildExited);
        debug!("Worker for {} {}", self.name, exit);

        let cleanup = match self.group_mode {
            GroupMode::ChildGroup => cleanup_worker_group(pgid, self.cleanup_grace)?,
            GroupMode::SharedGroup => cleanup_shared_group(pgid, self.cleanup_grace)?,
        };
        if !cleanup.is_clean() {
            warn!(
                "Process group {} of {} kept survivors after cleanup: {:?}",
                pgid, self.name, cleanup.survivors
            );
        }
        lifecycle.advance(IsolationState::GroupCleaned);

        Ok(IsolationResult {
            test: self.name.clone(),
            exit,
            process_group: pgid,
        })
    }

    /// Run `body` isolated and require the worker to exit with code 0.
    pub fn run_and_assert<F: FnOnce()>(&self, body: F) -> Result<()> {
        self.run_and_assert_returning(body)
    }

    /// [`IsolatedTest::run_and_assert`] for bodies returning `Result`.
    pub fn run_and_assert_returning<F, R>(&self, body: F) -> Result<()>
    where
        F: FnOnce() -> R,
        R: TestReturn,
    {
        let result = self.run_returning(body)?;
        let mut lifecycle = Lifecycle {
            test: &self.name,
            state: IsolationState::GroupCleaned,
        };
        lifecycle.advance(IsolationState::Asserted);

        if result.is_success() {
            Ok(())
        } else {
            Err(HarnessError::TestIsolationFailure {
                test: result.test,
                args: self.args.clone(),
                exit: result.exit,
            })
        }
    }

    fn is_reexec_worker(&self) -> bool {
        env::var(ISOLATED_WORKER_ENV).map_or(false, |target| target == self.name)
    }

    fn acknowledge_worker(&self) {
        if let Some(path) = env::var_os(WORKER_ACK_ENV) {
            if let Err(e) = fs::write(&path, self.name.as_bytes()) {
                eprintln!("failed to acknowledge isolated worker: {}", e);
            }
        }
    }

    fn run_forked<F, R>(&self, body: F, lifecycle: &mut Lifecycle<'_>) -> Result<(WorkerExit, u32)>
    where
        F: FnOnce() -> R,
        R: TestReturn,
    {
        let child_group = self.group_mode == GroupMode::ChildGroup;

        // SAFETY: the child only runs the body and then `_exit`s; it never
        // returns into the caller's stack frames.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                if child_group {
                    let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
                }
                let code = run_body(&self.name, body);
                // SAFETY: _exit skips atexit handlers and destructors that
                // belong to the parent's state.
                unsafe { nix::libc::_exit(code) }
            }
            Ok(ForkResult::Parent { child }) => {
                lifecycle.advance(IsolationState::ChildRunning);
                let pgid = if child_group {
                    // Also set here so the group exists whichever side runs
                    // first. Fails harmlessly once the child has exited.
                    if let Err(e) = setpgid(child, child) {
                        debug!("setpgid({}) from parent: {}", child, e);
                    }
                    child.as_raw() as u32
                } else {
                    getpgrp().as_raw() as u32
                };
                Ok((wait_worker(child)?, pgid))
            }
            Err(e) => Err(ProcessError::spawn_failed(&self.name, format!("fork failed: {}", e)).into()),
        }
    }

    fn run_reexec(&self, lifecycle: &mut Lifecycle<'_>) -> Result<(WorkerExit, u32)> {
        let exe = env::current_exe()?;
        let ack_dir = tempfile::tempdir()?;
        let ack_path = ack_dir.path().join("ack");

        let mut command = Command::new(&exe);
        command
            .arg(&self.name)
            .args(["--exact", "--nocapture", "--test-threads=1"])
            .env(ISOLATED_WORKER_ENV, &self.name)
            .env(WORKER_ACK_ENV, &ack_path);
        if self.group_mode == GroupMode::ChildGroup {
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| {
            ProcessError::spawn_failed(&self.name, format!("{}: {}", exe.display(), e))
        })?;
        lifecycle.advance(IsolationState::ChildRunning);

        let pgid = match self.group_mode {
            GroupMode::ChildGroup => child.id(),
            GroupMode::SharedGroup => getpgrp().as_raw() as u32,
        };
        let status = child
            .wait()
            .map_err(|e| ProcessError::wait_failed(&self.name, e.to_string()))?;
        let exit = exit_from_status(status);

        if exit.is_success() && !worker_acknowledged(&ack_path) {
            return Err(HarnessError::configuration(format!(
                "re-exec worker never ran {}; the name must be the test's libtest path",
                self.name
            )));
        }
        Ok((exit, pgid))
    }
}

impl fmt::Display for IsolatedTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.args)
    }
}

/// libtest path of test `name` declared in `module_path` (as produced by
/// `module_path!()`): the crate segment is dropped.
pub fn test_path(module_path: &str, name: &str) -> String {
    match module_path.split_once("::") {
        Some((_, rest)) => format!("{}::{}", rest, name),
        None => name.to_string(),
    }
}

fn worker_acknowledged(path: &Path) -> bool {
    path.exists()
}

fn wait_worker(child: Pid) -> Result<WorkerExit> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(WorkerExit::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(WorkerExit::Signaled {
                    signal: signal as i32,
                    name: signal.as_str().to_string(),
                })
            }
            Ok(other) => debug!("Worker {} changed state: {:?}", child, other),
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(ProcessError::wait_failed(child.to_string(), e.to_string()).into())
            }
        }
    }
}

fn exit_from_status(status: ExitStatus) -> WorkerExit {
    match (status.code(), status.signal()) {
        (Some(code), _) => WorkerExit::Exited(code),
        (None, Some(signal)) => WorkerExit::Signaled {
            signal,
            name: nix::sys::signal::Signal::try_from(signal)
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|_| format!("signal {}", signal)),
        },
        (None, None) => WorkerExit::Exited(-1),
    }
}
