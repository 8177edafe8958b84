//! Custom assertions for E2E tests

use std::collections::HashSet;
use std::hash::Hash;
use std::fmt::Debug;
use std::thread;
use std::time::{Duration, Instant};

use harness_process::{live_group_members, process_is_live};

/// Assert that `pid` has exited within `timeout`. Unreaped zombies count
/// as gone.
pub fn assert_process_gone(pid: u32, timeout: Duration) -> Result<(), String> {
    let deadline = Instant::now() + timeout;
    loop {
        match process_is_live(pid) {
            Ok(false) => return Ok(()),
            Ok(true) if Instant::now() >= deadline => {
                return Err(format!("Process {} still exists after {:?}", pid, timeout))
            }
            Ok(true) => thread::sleep(Duration::from_millis(25)),
            Err(e) => return Err(format!("Failed to query process {}: {}", pid, e)),
        }
    }
}

/// Assert that process group `pgid` has no live members.
pub fn assert_group_empty(pgid: u32) -> Result<(), String> {
    match live_group_members(pgid) {
        Ok(members) if members.is_empty() => Ok(()),
        Ok(members) => Err(format!("Process group {} still has members {:?}", pgid, members)),
        Err(e) => Err(format!("Failed to list process group {}: {}", pgid, e)),
    }
}

/// Assert that no two values are equal.
pub fn assert_all_distinct<T: Eq + Hash + Debug>(values: &[T]) -> Result<(), String> {
    let unique: HashSet<&T> = values.iter().collect();
    if unique.len() == values.len() {
        Ok(())
    } else {
        Err(format!("Expected distinct values, got {:?}", values))
    }
}
