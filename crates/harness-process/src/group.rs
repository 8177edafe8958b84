//! Process-group teardown: SIGTERM the whole group, wait for it to drain,
//! SIGKILL whatever is left.

use std::thread;
use std::time::{Duration, Instant};

use harness_common::ProcessResult;
use nix::sys::signal::Signal;
use tracing::{debug, info, warn};

use crate::check::live_group_members;
use crate::terminate::signal_group;

/// Time allowed for the group to exit after SIGKILL.
pub const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(3);

/// Poll period while waiting for a group to drain.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// What happened while cleaning up a process group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCleanup {
    pub pgid: u32,
    /// SIGTERM reached at least one process.
    pub signaled: bool,
    /// Members outlived the grace period and got SIGKILL.
    pub force_killed: bool,
    /// Members still alive after SIGKILL (should always be empty).
    pub survivors: Vec<u32>,
}

impl GroupCleanup {
    pub fn is_clean(&self) -> bool {
        self.survivors.is_empty()
    }
}

/// Terminate every process in group `pgid`, escalating to SIGKILL after
/// `grace`.
///
/// The caller must not be a member of the group (see
/// [`crate::SigtermIgnoreGuard`] for the shared-group case).
pub fn terminate_group(pgid: u32, grace: Duration) -> ProcessResult<GroupCleanup> {
    let mut cleanup = GroupCleanup {
        pgid,
        signaled: false,
        force_killed: false,
        survivors: Vec::new(),
    };

    cleanup.signaled = signal_group(pgid, Signal::SIGTERM)?;
    if !cleanup.signaled {
        return Ok(cleanup);
    }

    if wait_for_group_exit(pgid, grace)? {
        debug!("Process group {} drained after SIGTERM", pgid);
        return Ok(cleanup);
    }

    warn!(
        "Process group {} still has live members after {:?}, sending SIGKILL",
        pgid, grace
    );
    cleanup.force_killed = signal_group(pgid, Signal::SIGKILL)?;

    if !wait_for_group_exit(pgid, FORCE_KILL_TIMEOUT)? {
        cleanup.survivors = live_group_members(pgid)?;
        warn!(
            "Process group {} survivors after SIGKILL: {:?}",
            pgid, cleanup.survivors
        );
    } else {
        info!("Process group {} terminated after force kill", pgid);
    }

    Ok(cleanup)
}

/// Wait until group `pgid` has no live members. Returns `Ok(false)` if the
/// timeout elapsed first.
pub fn wait_for_group_exit(pgid: u32, timeout: Duration) -> ProcessResult<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if live_group_members(pgid)?.is_empty() {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
    }
}
