// HTTP health check implementation

use crate::{HealthCheckData, HealthCheckError, HealthCheckResult};
use chrono::Utc;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// HTTP health check configuration
#[derive(Debug, Clone)]
pub struct HttpHealthCheckConfig {
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for HttpHealthCheckConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl HttpHealthCheckConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Perform a `GET` health check against `endpoint`.
pub async fn check_http_health(
    endpoint: &str,
    check_timeout: Duration,
) -> HealthCheckResult<HealthCheckData> {
    let config = HttpHealthCheckConfig::new(endpoint).with_timeout(check_timeout);
    check_http_health_with_config(&config).await
}

/// Perform a `GET` health check with custom configuration. Healthy means
/// status 200.
///
/// Connection failures and timeouts are reported as unhealthy data with no
/// status code; only a malformed request is an `Err`.
pub async fn check_http_health_with_config(
    config: &HttpHealthCheckConfig,
) -> HealthCheckResult<HealthCheckData> {
    let start_time = std::time::Instant::now();

    let uri: Uri = config
        .endpoint
        .parse()
        .map_err(|e| HealthCheckError::InvalidRequest {
            id: config.endpoint.clone(),
            reason: format!("Invalid URI: {}", e),
        })?;

    let client = Client::builder(TokioExecutor::new()).build_http();

    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("User-Agent", "server-test-harness/0.1")
        .body(Empty::<Bytes>::new())
        .map_err(|e| HealthCheckError::InvalidRequest {
            id: config.endpoint.clone(),
            reason: format!("Failed to build request: {}", e),
        })?;

    let response = match timeout(config.timeout, client.request(request)).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            debug!("HTTP health check connection failed: {} - {}", config.endpoint, e);
            return Ok(HealthCheckData {
                is_healthy: false,
                status_code: None,
                checked_at: Utc::now(),
                response_time_ms: Some(start_time.elapsed().as_millis() as u64),
                error_message: Some(format!("Connection failed: {}", e)),
            });
        }
        Err(_) => {
            debug!("HTTP health check timeout: {}", config.endpoint);
            return Ok(HealthCheckData {
                is_healthy: false,
                status_code: None,
                checked_at: Utc::now(),
                response_time_ms: Some(config.timeout.as_millis() as u64),
                error_message: Some(format!("Timeout after {:?}", config.timeout)),
            });
        }
    };

    let status = response.status();
    let elapsed = start_time.elapsed().as_millis() as u64;
    // Only 200 counts; 503 while loading is the common "not yet".
    let is_healthy = status == StatusCode::OK;

    debug!(
        "HTTP health check complete: {} - status={} healthy={} time={}ms",
        config.endpoint, status, is_healthy, elapsed
    );

    Ok(HealthCheckData {
        is_healthy,
        status_code: Some(status.as_u16()),
        checked_at: Utc::now(),
        response_time_ms: Some(elapsed),
        error_message: if !is_healthy {
            Some(format!("Unexpected status code: {}", status))
        } else {
            None
        },
    })
}
