//! Core data model shared by the harness crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Where a launched server listens.
///
/// # Example
/// ```
/// use harness_common::ServerEndpoint;
///
/// let endpoint = ServerEndpoint::new("localhost", 8000);
/// assert_eq!(endpoint.url_root(), "http://localhost:8000");
/// assert_eq!(endpoint.url_for(&["v1", "models"]), "http://localhost:8000/v1/models");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL without a trailing slash.
    pub fn url_root(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Joins `parts` with `/` under the base URL.
    pub fn url_for(&self, parts: &[&str]) -> String {
        format!("{}/{}", self.url_root(), parts.join("/"))
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// OS identity of a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub pgid: u32,
}

/// One device's sampled memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceUsage {
    pub device: u32,
    pub used_bytes: u64,
}

impl DeviceUsage {
    /// Used memory in GiB, for display.
    pub fn used_gib(&self) -> f64 {
        self.used_bytes as f64 / (1u64 << 30) as f64
    }
}

/// What a GPU quiescence wait is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuiescenceTarget {
    pub devices: Vec<u32>,
    pub threshold_bytes: u64,
    pub timeout: Duration,
}

impl QuiescenceTarget {
    /// Default upper bound for a quiescence wait.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(devices: impl Into<Vec<u32>>, threshold_bytes: u64) -> Self {
        Self {
            devices: devices.into(),
            threshold_bytes,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// True when every sample is at or below the threshold.
    pub fn is_satisfied_by(&self, usage: &[DeviceUsage]) -> bool {
        usage.iter().all(|u| u.used_bytes <= self.threshold_bytes)
    }
}

/// How an isolated worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Normal exit with a status code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled { signal: i32, name: String },
}

impl WorkerExit {
    /// Exit code if the worker exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            WorkerExit::Exited(code) => Some(*code),
            WorkerExit::Signaled { .. } => None,
        }
    }

    /// Only a clean `exit(0)` counts as success.
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerExit::Exited(0))
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Exited(code) => write!(f, "exited with exit code {}", code),
            WorkerExit::Signaled { signal, name } => {
                write!(f, "terminated by signal {} ({})", name, signal)
            }
        }
    }
}

/// Outcome of one isolated test, owned by the parent runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationResult {
    pub test: String,
    pub exit: WorkerExit,
    /// Process group the worker ran in (cleaned up before this is returned).
    pub process_group: u32,
}

impl IsolationResult {
    pub fn is_success(&self) -> bool {
        self.exit.is_success()
    }
}

/// Placement of one distributed rank.
///
/// # Example
/// ```
/// use harness_common::RankAssignment;
///
/// let assignment = RankAssignment::new(2, 1, 1, 29500);
/// assert_eq!(assignment.world_size(), 2);
/// assert_eq!(assignment.init_method(), "tcp://localhost:29500");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankAssignment {
    pub tp_size: usize,
    pub pp_size: usize,
    pub rank: usize,
    pub rendezvous_port: u16,
    #[serde(default)]
    pub local_rank: Option<usize>,
}

impl RankAssignment {
    pub fn new(tp_size: usize, pp_size: usize, rank: usize, rendezvous_port: u16) -> Self {
        Self {
            tp_size,
            pp_size,
            rank,
            rendezvous_port,
            local_rank: None,
        }
    }

    pub fn with_local_rank(mut self, local_rank: usize) -> Self {
        self.local_rank = Some(local_rank);
        self
    }

    pub fn world_size(&self) -> usize {
        self.tp_size * self.pp_size
    }

    /// Rendezvous address every rank of the group connects to.
    pub fn init_method(&self) -> String {
        format!("tcp://localhost:{}", self.rendezvous_port)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
