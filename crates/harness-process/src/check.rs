//! Process and process-group existence checks.

use harness_common::{ProcessError, ProcessResult};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg};
use nix::unistd::Pid;

/// Check if a process with the given PID exists.
///
/// Uses `kill(pid, 0)`, which delivers nothing but reports whether the
/// process could be signaled. Zombies still count as existing.
///
/// ```rust,no_run
/// use harness_process::process_exists;
///
/// if process_exists(1234).unwrap() {
///     println!("Process 1234 is running");
/// }
/// ```
pub fn process_exists(pid: u32) -> ProcessResult<bool> {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        // Exists, but belongs to someone else
        Err(Errno::EPERM) => Ok(true),
        Err(e) => Err(ProcessError::query_failed(
            pid.to_string(),
            format!("Failed to check process: {}", e),
        )),
    }
}

/// Check if any process (zombies included) is still in process group `pgid`.
pub fn group_exists(pgid: u32) -> ProcessResult<bool> {
    match killpg(Pid::from_raw(pgid as i32), None) {
        Ok(_) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(Errno::EPERM) => Ok(true),
        Err(e) => Err(ProcessError::query_failed(
            format!("pgid {}", pgid),
            format!("Failed to check process group: {}", e),
        )),
    }
}

/// Whether `pid` exists and is not a zombie.
///
/// Orphans reparented to a PID 1 that never reaps stay zombies forever;
/// they hold nothing and count as gone here.
#[cfg(target_os = "linux")]
pub fn process_is_live(pid: u32) -> ProcessResult<bool> {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => Ok(matches!(
            parse_stat_state_and_pgrp(&stat),
            Some((state, _)) if state != 'Z' && state != 'X'
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ProcessError::query_failed(
            pid.to_string(),
            format!("Failed to read process state: {}", e),
        )),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn process_is_live(pid: u32) -> ProcessResult<bool> {
    process_exists(pid)
}

/// List the live (non-zombie) members of process group `pgid`.
///
/// Zombies are skipped: an orphan that was already killed but not yet reaped
/// by its new parent holds no resources and cannot be signaled further.
#[cfg(target_os = "linux")]
pub fn live_group_members(pgid: u32) -> ProcessResult<Vec<u32>> {
    let entries = std::fs::read_dir("/proc").map_err(|e| {
        ProcessError::query_failed(format!("pgid {}", pgid), format!("Failed to read /proc: {}", e))
    })?;

    let mut members = Vec::new();
    for entry in entries.flatten() {
        let pid: u32 = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            Some(pid) => pid,
            None => continue,
        };

        // The process may vanish between read_dir and read; that is fine.
        let stat = match std::fs::read_to_string(entry.path().join("stat")) {
            Ok(stat) => stat,
            Err(_) => continue,
        };

        if let Some((state, pgrp)) = parse_stat_state_and_pgrp(&stat) {
            if pgrp == pgid && state != 'Z' && state != 'X' {
                members.push(pid);
            }
        }
    }

    members.sort_unstable();
    Ok(members)
}

/// Without procfs the members cannot be listed; report the group id itself
/// while anything still answers to it.
#[cfg(not(target_os = "linux"))]
pub fn live_group_members(pgid: u32) -> ProcessResult<Vec<u32>> {
    Ok(if group_exists(pgid)? { vec![pgid] } else { Vec::new() })
}

/// Extract `(state, pgrp)` from a `/proc/<pid>/stat` line.
///
/// The command name is wrapped in parentheses and may itself contain spaces
/// or parentheses, so parsing starts after the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat_state_and_pgrp(stat: &str) -> Option<(char, u32)> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let _ppid = fields.next()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some((state, pgrp))
}
