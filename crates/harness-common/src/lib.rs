//! # Harness Common
//!
//! Common types and errors shared across the harness crates.
//!
//! Every other crate in the workspace builds on the error taxonomy defined
//! here (configuration mistakes, crashed or slow servers, unreleased GPU
//! memory, failed isolated tests, failed ranks) and on the small data model
//! that flows between them.

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{HarnessError, ProcessError, ProcessResult, Result, ResultExt};
pub use types::{
    DeviceUsage, IsolationResult, ProcessIdentity, QuiescenceTarget, RankAssignment,
    ServerEndpoint, WorkerExit,
};
