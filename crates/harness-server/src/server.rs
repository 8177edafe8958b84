//! The running server handle.

use std::fmt;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use harness_common::{HarnessError, Result, ServerEndpoint};
use harness_monitoring::{
    BlockingHealthCheck, HttpHealthCheckConfig, CheckOutcome, Readiness, ReadinessPoller,
};
use harness_process::{reserve_open_port, CommandSpec, ManagedProcess, PortReservation};
use tracing::{debug, info};

use crate::args::{has_port_flag, parse_host, parse_port};
use crate::config::ServerConfig;

/// API key accepted by a server started without authentication.
pub const DUMMY_API_KEY: &str = "token-abc123";

/// Set to `spawn` so the server's own workers do not fork a CUDA context.
pub const WORKER_MULTIPROC_METHOD_ENV: &str = "VLLM_WORKER_MULTIPROC_METHOD";

/// Floor for a single health request. The last attempt before the deadline
/// may overrun it by at most this much.
const MIN_HEALTH_REQUEST: Duration = Duration::from_millis(50);

/// A model server running for the lifetime of this value.
///
/// Construction returns only once `GET /health` answers 200. Dropping the
/// handle sends SIGTERM, waits up to the shutdown timeout, then SIGKILLs and
/// reaps the process. This happens on normal scope exit, on `?` propagation
/// and while unwinding from a panic.
pub struct RemoteServer {
    // Field order matters: the process is torn down before the port is
    // handed back to the registry.
    process: ManagedProcess,
    endpoint: ServerEndpoint,
    startup_time: Duration,
    _port: Option<PortReservation>,
}

impl RemoteServer {
    pub fn start(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        if config.auto_port && has_port_flag(&config.cli_args) {
            return Err(HarnessError::configuration(
                "You have manually specified the port when `auto_port=true`.",
            ));
        }

        let mut args = config.cli_args.clone();
        let reservation = if config.auto_port {
            let reservation = reserve_open_port()?;
            args.push("--port".to_string());
            args.push(reservation.port().to_string());
            Some(reservation)
        } else {
            None
        };

        let endpoint = ServerEndpoint::new(parse_host(&args), parse_port(&args)?);

        let spec = server_command(&config, args);

        let id = format!("{}@{}", config.model, endpoint);
        let mut process = ManagedProcess::spawn(&id, &spec)?
            .with_shutdown_timeout(config.shutdown_timeout);

        let start = Instant::now();
        wait_until_healthy(&id, &mut process, &endpoint, &config)?;
        let startup_time = start.elapsed();
        info!("Server {} is healthy after {:?}", id, startup_time);

        Ok(Self {
            process,
            endpoint,
            startup_time,
            _port: reservation,
        })
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn host(&self) -> &str {
        &self.endpoint.host
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn startup_time(&self) -> Duration {
        self.startup_time
    }

    /// `http://host:port`
    pub fn url_root(&self) -> String {
        self.endpoint.url_root()
    }

    pub fn url_for(&self, parts: &[&str]) -> String {
        self.endpoint.url_for(parts)
    }

    /// Base URL for an OpenAI-compatible client.
    pub fn api_base(&self) -> String {
        self.url_for(&["v1"])
    }

    pub fn api_key(&self) -> &'static str {
        DUMMY_API_KEY
    }

    /// True while the server process has not exited.
    pub fn is_running(&mut self) -> bool {
        self.process.is_running()
    }

    /// Tear the server down now instead of at drop.
    pub fn stop(mut self) -> Result<ExitStatus> {
        Ok(self.process.terminate()?)
    }
}

impl fmt::Debug for RemoteServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteServer")
            .field("endpoint", &self.endpoint)
            .field("process", &self.process)
            .finish()
    }
}

/// `<binary> serve <model> <args...>` with the worker start method pinned
/// to `spawn`. Caller overrides win over the injected default.
fn server_command(config: &ServerConfig, args: Vec<String>) -> CommandSpec {
    let mut spec = CommandSpec::new(&config.binary)
        .arg("serve")
        .arg(&config.model)
        .args(args)
        .env(WORKER_MULTIPROC_METHOD_ENV, "spawn");
    let mut overrides: Vec<_> = config.env.iter().collect();
    overrides.sort();
    for (key, value) in overrides {
        spec = spec.env(key, value);
    }
    spec
}

fn wait_until_healthy(
    id: &str,
    process: &mut ManagedProcess,
    endpoint: &ServerEndpoint,
    config: &ServerConfig,
) -> Result<()> {
    let health_url = endpoint.url_for(&["health"]);
    let health = BlockingHealthCheck::new(HttpHealthCheckConfig::new(&health_url))
        .map_err(|e| HarnessError::configuration(format!("health check for {}: {}", id, e)))?;
    let poller = ReadinessPoller::new(config.startup_timeout, config.poll_interval);
    debug!("Waiting up to {:?} for {}", config.startup_timeout, health_url);

    let readiness = poller.poll(&mut |budget: Duration| {
        let last_error = match health.check(budget.max(MIN_HEALTH_REQUEST)) {
            Ok(data) if data.is_healthy => return CheckOutcome::Ready,
            Ok(data) => data.describe(),
            Err(e) => e.to_string(),
        };

        match process.try_exit_status() {
            Ok(None) => CheckOutcome::Pending(last_error),
            // A clean exit before becoming healthy is not treated as a crash;
            // the wait runs on to its deadline.
            Ok(Some(status)) if status.success() => {
                CheckOutcome::Pending(format!("{} (server exited: {})", last_error, status))
            }
            Ok(Some(status)) => CheckOutcome::Crashed {
                exit_code: status.code(),
                detail: status.to_string(),
            },
            Err(e) => CheckOutcome::Crashed {
                exit_code: None,
                detail: e.to_string(),
            },
        }
    });

    match readiness {
        Readiness::Ready { .. } => Ok(()),
        Readiness::Crashed {
            exit_code, detail, ..
        } => Err(HarnessError::server_crashed(id, exit_code, detail)),
        Readiness::TimedOut { last_error, .. } => Err(HarnessError::server_start_timeout(
            id,
            config.startup_timeout,
            last_error,
        )),
    }
}
