//! # Harness Monitoring
//!
//! Health checking and readiness polling for servers under test.
//!
//! This crate provides:
//! - HTTP health checks (async, hyper based)
//! - A blocking wrapper for synchronous test code
//! - A bounded readiness poller that separates "crashed" from "not up yet"

pub mod blocking;
pub mod http;
pub mod readiness;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Health check error types.
#[derive(Error, Debug)]
pub enum HealthCheckError {
    #[error("Health check invalid request: {id} - {reason}")]
    InvalidRequest { id: String, reason: String },

    #[error("Health check runtime unavailable: {0}")]
    Runtime(String),
}

/// Result type for health check operations.
pub type HealthCheckResult<T> = Result<T, HealthCheckError>;

/// Health check result data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckData {
    pub is_healthy: bool,
    /// HTTP status, `None` when no response was received.
    pub status_code: Option<u16>,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
}

impl HealthCheckData {
    /// True when the request failed before any response arrived.
    pub fn is_connection_failure(&self) -> bool {
        self.status_code.is_none()
    }

    /// Short human-readable reason for an unhealthy result.
    pub fn describe(&self) -> String {
        match (&self.error_message, self.status_code) {
            (Some(message), _) => message.clone(),
            (None, Some(status)) => format!("status {}", status),
            (None, None) => "no response".to_string(),
        }
    }
}

// Re-export main types
pub use blocking::BlockingHealthCheck;
pub use http::*;
pub use readiness::*;
