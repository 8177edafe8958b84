//! Blocking front-end for the async HTTP health check.
//!
//! Test harness code is synchronous: it blocks the calling test thread while
//! a server starts. The checker owns a small current-thread runtime and drives
//! each check to completion on it.
//!
//! Calling [`BlockingHealthCheck::check`] from inside another tokio runtime
//! panics (nested `block_on`); async tests should move harness work onto
//! `spawn_blocking`.

use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

use crate::http::{check_http_health_with_config, HttpHealthCheckConfig};
use crate::{HealthCheckData, HealthCheckError, HealthCheckResult};

pub struct BlockingHealthCheck {
    runtime: Runtime,
    config: HttpHealthCheckConfig,
}

impl BlockingHealthCheck {
    pub fn new(config: HttpHealthCheckConfig) -> HealthCheckResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| HealthCheckError::Runtime(e.to_string()))?;
        Ok(Self { runtime, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Run one check, never waiting longer than `max_wait` (nor the
    /// configured request timeout).
    pub fn check(&self, max_wait: Duration) -> HealthCheckResult<HealthCheckData> {
        let mut config = self.config.clone();
        config.timeout = config.timeout.min(max_wait);
        self.runtime
            .block_on(async move { check_http_health_with_config(&config).await })
    }
}
