//! Tearing down whatever an isolated worker left behind.

use std::process;
use std::thread;
use std::time::{Duration, Instant};

use harness_common::ProcessResult;
use harness_process::{
    force_kill, live_group_members, signal_group, terminate_group, GroupCleanup,
    SigtermIgnoreGuard, EXIT_POLL_INTERVAL, FORCE_KILL_TIMEOUT,
};
use nix::sys::signal::Signal;
use tracing::{info, warn};

/// Clean up a group led by the worker. The runner is not a member.
pub fn cleanup_worker_group(pgid: u32, grace: Duration) -> ProcessResult<GroupCleanup> {
    terminate_group(pgid, grace)
}

/// Clean up a group the runner itself belongs to.
///
/// SIGTERM is ignored by the runner for the duration of the broadcast; the
/// previous disposition is restored before waiting. Members other than the
/// runner that outlive `grace` are SIGKILLed one by one.
pub fn cleanup_shared_group(pgid: u32, grace: Duration) -> ProcessResult<GroupCleanup> {
    let me = process::id();
    let signaled = {
        let _guard = SigtermIgnoreGuard::install()?;
        signal_group(pgid, Signal::SIGTERM)?
    };

    let mut cleanup = GroupCleanup {
        pgid,
        signaled,
        force_killed: false,
        survivors: Vec::new(),
    };

    let remaining = wait_for_others(pgid, me, grace)?;
    if remaining.is_empty() {
        return Ok(cleanup);
    }

    warn!(
        "Shared process group {} still has members {:?} after {:?}, sending SIGKILL",
        pgid, remaining, grace
    );
    for pid in remaining {
        // Gone already if this fails with ESRCH; survivors are recounted below.
        if let Err(e) = force_kill(pid) {
            warn!("Failed to SIGKILL {}: {}", pid, e);
        }
    }
    cleanup.force_killed = true;
    cleanup.survivors = wait_for_others(pgid, me, FORCE_KILL_TIMEOUT)?;
    if cleanup.is_clean() {
        info!("Shared process group {} cleaned after force kill", pgid);
    }
    Ok(cleanup)
}

/// Live members of `pgid` other than `me` once they are gone or `timeout`
/// elapses.
fn wait_for_others(pgid: u32, me: u32, timeout: Duration) -> ProcessResult<Vec<u32>> {
    let deadline = Instant::now() + timeout;
    loop {
        let others: Vec<u32> = live_group_members(pgid)?
            .into_iter()
            .filter(|pid| *pid != me)
            .collect();
        let now = Instant::now();
        if others.is_empty() || now >= deadline {
            return Ok(others);
        }
        thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
    }
}
