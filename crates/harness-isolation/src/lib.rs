//! # Harness Isolation
//!
//! Runs a test body in a separate OS process so that global state it
//! initializes (device contexts, signal handlers, leaked child processes)
//! cannot leak into the next test.
//!
//! The parent waits for the worker, tears down the worker's process group,
//! and then requires exit code 0. A body passes by returning normally (or
//! `Ok(())`), fails by panicking (or returning `Err`), and may skip itself
//! with [`skip`]. Bodies returning `Result` go through
//! [`IsolatedTest::run_returning`] or declare their return type in
//! [`isolated_test!`].
//!
//! ```rust,no_run
//! use harness_isolation::{isolated_test, skip};
//!
//! isolated_test! {
//!     fn test_initializes_device_context() {
//!         if std::env::var_os("CUDA_VISIBLE_DEVICES").is_none() {
//!             skip("no GPU visible");
//!         }
//!         // ... touch process-global state freely ...
//!     }
//! }
//! ```

#[macro_use]
mod macros;

pub mod cleanup;
pub mod runner;
pub mod warnings;
pub mod worker;

pub use harness_common::{HarnessError, IsolationResult, Result, WorkerExit};
pub use runner::{test_path, GroupMode, IsolatedTest, IsolationState, WorkerStrategy, ISOLATED_WORKER_ENV};
pub use warnings::error_on_warning;
pub use worker::{skip, Skip, TestReturn, EXIT_FAILED, EXIT_PASSED};
