//! Error types for the harness.
//!
//! Two levels, mirroring how the crates are layered:
//!
//! - [`ProcessError`] covers low-level process plumbing (spawning, signals,
//!   waiting, port allocation). It is `Clone` so it can be stored in
//!   diagnostics and returned from several places.
//! - [`HarnessError`] is what test code sees. Each variant is one outcome a
//!   test has to handle: misuse, a crashed server, a server that never became
//!   healthy, GPU memory that never drained, an isolated test that failed, or
//!   a failed distributed rank.
//!
//! ```rust
//! use harness_common::{HarnessError, Result};
//!
//! fn start(args: &[&str]) -> Result<()> {
//!     if args.contains(&"--port") {
//!         return Err(HarnessError::configuration(
//!             "port specified manually while auto_port is enabled",
//!         ));
//!     }
//!     Ok(())
//! }
//!
//! assert!(matches!(start(&["--port", "80"]), Err(HarnessError::Configuration { .. })));
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::types::{DeviceUsage, WorkerExit};

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Main error type surfaced to test code.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Caller misuse, detected before any process is spawned.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// The server exited with a failure status before it became healthy.
    #[error("Server exited unexpectedly: {id} - exit code {exit_code:?} ({detail})")]
    ServerCrashed {
        id: String,
        exit_code: Option<i32>,
        detail: String,
    },

    /// The server kept running but never answered its health check in time.
    #[error("Server failed to start in time: {id} - no healthy response within {timeout:?} (last error: {last_error})")]
    ServerStartTimeout {
        id: String,
        timeout: Duration,
        last_error: String,
    },

    /// Device memory did not drop below the threshold before the timeout.
    #[error("Memory of devices {devices:?} not free after {elapsed:?} (threshold {threshold_bytes} bytes, last usage {last_usage:?})")]
    ResourceNotReleased {
        devices: Vec<u32>,
        threshold_bytes: u64,
        elapsed: Duration,
        last_usage: Vec<DeviceUsage>,
    },

    /// An isolated test worker ended with anything other than exit code 0.
    #[error("function {test} failed when called with args {args}: worker {exit}")]
    TestIsolationFailure {
        test: String,
        args: String,
        exit: WorkerExit,
    },

    /// A distributed rank failed; `reason` carries the rank's own error text.
    #[error("Rank {rank} failed: {reason}")]
    RankFailed { rank: usize, reason: String },

    /// Two server settings produced different results for the same query.
    #[error("Results differ at item {index}: {detail}")]
    SettingsMismatch { index: usize, detail: String },

    /// A warning was logged inside an `error_on_warning` scope.
    #[error("{count} warning(s) emitted, first: {first}")]
    WarningEmitted { count: usize, first: String },

    /// GPU telemetry backend could not be initialized or queried.
    #[error("Telemetry error ({backend}): {reason}")]
    Telemetry { backend: String, reason: String },

    /// Low-level process failure.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error with added context.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        source: Box<HarnessError>,
    },
}

impl HarnessError {
    /// Creates a Configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Creates a ServerCrashed error.
    pub fn server_crashed(
        id: impl Into<String>,
        exit_code: Option<i32>,
        detail: impl Into<String>,
    ) -> Self {
        Self::ServerCrashed {
            id: id.into(),
            exit_code,
            detail: detail.into(),
        }
    }

    /// Creates a ServerStartTimeout error.
    pub fn server_start_timeout(
        id: impl Into<String>,
        timeout: Duration,
        last_error: impl Into<String>,
    ) -> Self {
        Self::ServerStartTimeout {
            id: id.into(),
            timeout,
            last_error: last_error.into(),
        }
    }

    /// Creates a RankFailed error.
    pub fn rank_failed(rank: usize, reason: impl Into<String>) -> Self {
        Self::RankFailed {
            rank,
            reason: reason.into(),
        }
    }

    /// Creates a Telemetry error.
    pub fn telemetry(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Telemetry {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Adds context to an error.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::WithContext {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Strips any `WithContext` layers and returns the underlying error.
    pub fn root(&self) -> &HarnessError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Convenience methods for Result types
pub trait ResultExt<T> {
    /// Adds context to an error result.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(message))
    }
}

// ==============================================================================
// Process Errors
// ==============================================================================

/// Process-level error types.
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    #[error("Process spawn failed: {id} - {reason}")]
    SpawnFailed { id: String, reason: String },

    #[error("Process stop failed: {id} - {reason}")]
    StopFailed { id: String, reason: String },

    #[error("Signal delivery failed: {target} - {signal}: {reason}")]
    SignalFailed {
        target: String,
        signal: String,
        reason: String,
    },

    #[error("Process wait failed: {id} - {reason}")]
    WaitFailed { id: String, reason: String },

    #[error("Process timeout: {id} - {operation}")]
    Timeout { id: String, operation: String },

    #[error("Process query failed: {id} - {reason}")]
    QueryFailed { id: String, reason: String },

    #[error("Port allocation failed: {reason}")]
    PortAllocation { reason: String },
}

impl ProcessError {
    pub fn spawn_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn stop_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StopFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn signal_failed(
        target: impl Into<String>,
        signal: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SignalFailed {
            target: target.into(),
            signal: signal.into(),
            reason: reason.into(),
        }
    }

    pub fn wait_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WaitFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Timeout {
            id: id.into(),
            operation: operation.into(),
        }
    }

    pub fn query_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::QueryFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn port_allocation(reason: impl Into<String>) -> Self {
        Self::PortAllocation {
            reason: reason.into(),
        }
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
