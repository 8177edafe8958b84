//! Signal delivery: single processes, whole process groups, and a guard that
//! shields the current process from its own group broadcast.

use harness_common::{ProcessError, ProcessResult};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// Terminate a process gracefully (SIGTERM).
pub fn terminate_gracefully(pid: u32) -> ProcessResult<()> {
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| ProcessError::signal_failed(pid.to_string(), "SIGTERM", e.to_string()))
}

/// Force kill a process (SIGKILL).
pub fn force_kill(pid: u32) -> ProcessResult<()> {
    kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
        .map_err(|e| ProcessError::signal_failed(pid.to_string(), "SIGKILL", e.to_string()))
}

/// Send `signal` to every process in group `pgid`.
///
/// Returns `Ok(false)` when the group no longer exists, which callers treat
/// as "nothing left to clean up" rather than as an error.
pub fn signal_group(pgid: u32, signal: Signal) -> ProcessResult<bool> {
    match killpg(Pid::from_raw(pgid as i32), signal) {
        Ok(()) => {
            debug!("Sent {} to process group {}", signal, pgid);
            Ok(true)
        }
        Err(Errno::ESRCH) => {
            debug!("Process group {} already empty, {} not sent", pgid, signal);
            Ok(false)
        }
        Err(e) => Err(ProcessError::signal_failed(
            format!("pgid {}", pgid),
            signal.as_str(),
            e.to_string(),
        )),
    }
}

/// Ignores SIGTERM in the current process until dropped, then restores the
/// previous disposition.
///
/// Needed when the caller broadcasts SIGTERM to a process group it is itself
/// a member of. The disposition is process-wide: any other thread relying on
/// SIGTERM during that window will miss it.
pub struct SigtermIgnoreGuard {
    previous: SigAction,
}

impl SigtermIgnoreGuard {
    pub fn install() -> ProcessResult<Self> {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        // SAFETY: SIG_IGN installs no user code, so no handler can observe
        // inconsistent state.
        let previous = unsafe { sigaction(Signal::SIGTERM, &ignore) }.map_err(|e| {
            ProcessError::signal_failed("self", "SIGTERM", format!("Failed to ignore: {}", e))
        })?;
        debug!("SIGTERM ignored for the current process");
        Ok(Self { previous })
    }
}

impl Drop for SigtermIgnoreGuard {
    fn drop(&mut self) {
        // SAFETY: restores exactly the disposition that was in place before.
        if let Err(e) = unsafe { sigaction(Signal::SIGTERM, &self.previous) } {
            warn!("Failed to restore SIGTERM disposition: {}", e);
        } else {
            debug!("SIGTERM disposition restored");
        }
    }
}
