use std::path::{Path, PathBuf};

use harness_common::{HarnessError, RankAssignment, Result};
use harness_process::reserve_open_port;
use tracing::{error, info};

use crate::executor::{ExecutionContext, TaskExecutor};

/// Root of the workspace this crate was built in; ranks run from here.
pub fn repository_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .ancestors()
        .nth(2)
        .unwrap_or(manifest_dir)
        .to_path_buf()
}

/// Runs one task per rank and fails if any rank fails.
#[derive(Debug, Clone)]
pub struct MultiRankLauncher {
    working_dir: PathBuf,
}

impl Default for MultiRankLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiRankLauncher {
    pub fn new() -> Self {
        Self {
            working_dir: repository_root(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Run `entry` for ranks `0..tp_size * pp_size`, all sharing one
    /// rendezvous port, and wait for every rank.
    ///
    /// The lowest failing rank is reported; every failure is logged.
    pub fn launch<E: TaskExecutor + ?Sized>(
        &self,
        executor: &mut E,
        tp_size: usize,
        pp_size: usize,
        entry: &E::Entry,
    ) -> Result<()> {
        if tp_size == 0 || pp_size == 0 {
            return Err(HarnessError::configuration(format!(
                "tp_size and pp_size must be at least 1 (got tp={}, pp={})",
                tp_size, pp_size
            )));
        }
        let world_size = tp_size * pp_size;

        let mut context = ExecutionContext::init(executor, &self.working_dir)?;
        let port = reserve_open_port()?;
        info!(
            "Launching {} rank(s) (tp={}, pp={}) on {} with rendezvous port {}",
            world_size,
            tp_size,
            pp_size,
            context.name(),
            port.port()
        );

        for rank in 0..world_size {
            context.submit(entry, RankAssignment::new(tp_size, pp_size, rank, port.port()))?;
        }

        let mut outcomes = context.join_all();
        outcomes.sort_by_key(|(rank, _)| *rank);

        let mut first_failure = None;
        for (rank, outcome) in outcomes {
            if let Err(reason) = outcome {
                error!("Rank {} of {} failed: {}", rank, world_size, reason);
                first_failure.get_or_insert(HarnessError::rank_failed(rank, reason));
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => {
                info!("All {} rank(s) completed", world_size);
                Ok(())
            }
        }
    }
}
