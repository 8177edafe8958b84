//! The task-executor seam and its scoped context.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use harness_common::{RankAssignment, Result};
use tracing::debug;

/// Outcome of one rank: `Err` carries the rank's own failure text.
pub type RankOutcome = std::result::Result<(), String>;

/// Something that can run one task per rank in parallel.
pub trait TaskExecutor {
    /// What a task runs.
    type Entry: ?Sized;

    fn name(&self) -> &'static str;

    /// Prepare the executor; tasks run with `working_dir` as their root.
    fn init(&mut self, working_dir: &Path) -> Result<()>;

    /// Start one task. Must not wait for it.
    fn submit(&mut self, entry: &Self::Entry, assignment: RankAssignment) -> Result<()>;

    /// Wait for every submitted task; one outcome per rank.
    fn join_all(&mut self) -> Vec<(usize, RankOutcome)>;

    /// Release executor resources, stopping anything not yet joined.
    fn shutdown(&mut self);
}

/// An initialized executor. Dropping it shuts the executor down, whether the
/// launch succeeded, failed, or panicked.
pub struct ExecutionContext<'a, E: TaskExecutor + ?Sized> {
    executor: &'a mut E,
}

impl<'a, E: TaskExecutor + ?Sized> ExecutionContext<'a, E> {
    pub fn init(executor: &'a mut E, working_dir: &Path) -> Result<Self> {
        executor.init(working_dir)?;
        debug!("Executor {} initialized in {}", executor.name(), working_dir.display());
        Ok(Self { executor })
    }
}

impl<E: TaskExecutor + ?Sized> Deref for ExecutionContext<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.executor
    }
}

impl<E: TaskExecutor + ?Sized> DerefMut for ExecutionContext<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.executor
    }
}

impl<E: TaskExecutor + ?Sized> Drop for ExecutionContext<'_, E> {
    fn drop(&mut self) {
        self.executor.shutdown();
        debug!("Executor {} shut down", self.executor.name());
    }
}
