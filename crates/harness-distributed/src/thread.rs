//! Ranks as threads of the current process.

use std::any::Any;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use harness_common::{ProcessError, RankAssignment, Result};
use tracing::{debug, warn};

use crate::executor::{RankOutcome, TaskExecutor};

pub type RankError = Box<dyn Error + Send + Sync>;

/// Entry point run once per rank.
pub type RankEntry = Arc<dyn Fn(&RankAssignment) -> std::result::Result<(), RankError> + Send + Sync>;

/// Wrap a closure as a [`RankEntry`].
pub fn rank_entry<F>(entry: F) -> RankEntry
where
    F: Fn(&RankAssignment) -> std::result::Result<(), RankError> + Send + Sync + 'static,
{
    Arc::new(entry)
}

/// Runs every rank on its own thread. Panics are captured as rank failures.
#[derive(Default)]
pub struct ThreadExecutor {
    working_dir: Option<PathBuf>,
    running: Vec<(usize, JoinHandle<RankOutcome>)>,
}

impl ThreadExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

impl TaskExecutor for ThreadExecutor {
    type Entry = RankEntry;

    fn name(&self) -> &'static str {
        "threads"
    }

    fn init(&mut self, working_dir: &Path) -> Result<()> {
        self.working_dir = Some(working_dir.to_path_buf());
        Ok(())
    }

    fn submit(&mut self, entry: &RankEntry, assignment: RankAssignment) -> Result<()> {
        let rank = assignment.rank;
        let entry = Arc::clone(entry);
        let handle = thread::Builder::new()
            .name(format!("rank-{}", rank))
            .spawn(move || {
                match panic::catch_unwind(AssertUnwindSafe(|| entry(&assignment))) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
                }
            })
            .map_err(|e| ProcessError::spawn_failed(format!("rank-{}", rank), e.to_string()))?;
        debug!("Submitted rank {} as thread", rank);
        self.running.push((rank, handle));
        Ok(())
    }

    fn join_all(&mut self) -> Vec<(usize, RankOutcome)> {
        self.running
            .drain(..)
            .map(|(rank, handle)| {
                let outcome = handle
                    .join()
                    .unwrap_or_else(|_| Err("rank thread could not be joined".to_string()));
                (rank, outcome)
            })
            .collect()
    }

    fn shutdown(&mut self) {
        // Threads cannot be stopped from outside; wait for stragglers.
        if !self.running.is_empty() {
            warn!("Joining {} unjoined rank thread(s) at shutdown", self.running.len());
            let _ = self.join_all();
        }
        self.working_dir = None;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
