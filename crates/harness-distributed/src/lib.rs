//! # Harness Distributed
//!
//! Runs a test entry point once per rank of a `tp x pp` group. All ranks
//! share one rendezvous port; any failing rank fails the launch.
//!
//! ```rust
//! use harness_distributed::{rank_entry, MultiRankLauncher, ThreadExecutor};
//!
//! let entry = rank_entry(|assignment| {
//!     assert!(assignment.rank < assignment.world_size());
//!     Ok(())
//! });
//! MultiRankLauncher::new().launch(&mut ThreadExecutor::new(), 2, 1, &entry)?;
//! # Ok::<(), harness_common::HarnessError>(())
//! ```

pub mod executor;
pub mod init;
pub mod launcher;
pub mod process;
pub mod thread;

pub use executor::{ExecutionContext, RankOutcome, TaskExecutor};
pub use init::{
    init_test_distributed_environment, DistributedInitializer, TcpBarrierInitializer,
    DEFAULT_RENDEZVOUS_TIMEOUT,
};
pub use launcher::{repository_root, MultiRankLauncher};
pub use process::{rank_assignment_from_env, ProcessExecutor, WorkerCommand, RANK_ASSIGNMENT_ENV};
pub use thread::{rank_entry, RankEntry, RankError, ThreadExecutor};
