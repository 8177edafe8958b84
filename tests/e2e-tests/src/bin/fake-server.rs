//! Stand-in for `vllm serve` in end-to-end tests.
//!
//! Speaks just enough HTTP for the harness: `GET /health` and
//! `GET /v1/models`. Flags make it slow, broken, crashy or stubborn.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "fake-server")]
#[command(about = "Fake OpenAI-compatible server for harness tests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve a model
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug, Clone)]
struct ServeArgs {
    /// Model name reported by /v1/models
    model: String,

    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Delay before the listener is bound
    #[arg(long, default_value = "0")]
    startup_delay_ms: u64,

    /// Exit on its own after this many milliseconds
    #[arg(long)]
    crash_after_ms: Option<u64>,

    /// Exit code used by --crash-after-ms
    #[arg(long, default_value = "1")]
    exit_code: i32,

    /// Answer /health with 503 forever
    #[arg(long)]
    never_healthy: bool,

    /// Keep running after SIGTERM
    #[arg(long)]
    ignore_sigterm: bool,

    /// Start a long sleep child and write its PID to this file
    #[arg(long)]
    spawn_orphan: Option<PathBuf>,

    /// Seed echoed by /v1/models
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let Commands::Serve(args) = Cli::parse().command;
    info!("Starting fake-server with args: {:?}", args);
    if let Ok(method) = std::env::var("VLLM_WORKER_MULTIPROC_METHOD") {
        debug!("Worker multiprocessing method: {}", method);
    }

    if let Some(path) = &args.spawn_orphan {
        let child = Command::new("sleep")
            .arg("300")
            .stdin(Stdio::null())
            .spawn()
            .context("Failed to spawn orphan")?;
        std::fs::write(path, child.id().to_string())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Spawned orphan child {}", child.id());
    }

    if let Some(crash_after) = args.crash_after_ms {
        let exit_code = args.exit_code;
        tokio::spawn(async move {
            sleep(Duration::from_millis(crash_after)).await;
            error!("fake-server exiting with code {} as requested", exit_code);
            std::process::exit(exit_code);
        });
    }

    if args.startup_delay_ms > 0 {
        info!("Startup delay: waiting {} ms", args.startup_delay_ms);
        sleep(Duration::from_millis(args.startup_delay_ms)).await;
    }

    // Installed before the listener exists so a healthy server always
    // honors (or ignores) SIGTERM.
    let shutdown = ShutdownSignals::install()?;

    let args = Arc::new(args);
    let mut server = tokio::spawn(run_http_server(Arc::clone(&args)));

    tokio::select! {
        result = &mut server => {
            // The accept loop only ends on a bind failure.
            result.context("HTTP server task failed")??;
        }
        result = shutdown.wait(args.ignore_sigterm) => {
            result?;
            server.abort();
        }
    }
    info!("fake-server stopped");
    Ok(())
}

struct ShutdownSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?,
        })
    }

    async fn wait(mut self, ignore_sigterm: bool) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.sigterm.recv() => {
                    if ignore_sigterm {
                        warn!("Received SIGTERM, ignoring as requested");
                        continue;
                    }
                    info!("Received SIGTERM signal");
                    return Ok(());
                }
                _ = self.sigint.recv() => {
                    info!("Received SIGINT signal");
                    return Ok(());
                }
            }
        }
    }
}

async fn run_http_server(args: Arc<ServeArgs>) -> Result<()> {
    let host = if args.host == "localhost" {
        "127.0.0.1"
    } else {
        args.host.as_str()
    };
    let addr: SocketAddr = format!("{}:{}", host, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, args.port))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("fake-server listening on http://{}", addr);

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let args = Arc::clone(&args);
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let args = Arc::clone(&args);
                async move { Ok::<_, Infallible>(route(&req, &args)) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving connection: {}", e);
            }
        });
    }
}

fn route(req: &Request<hyper::body::Incoming>, args: &ServeArgs) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/health" if args.never_healthy => respond(StatusCode::SERVICE_UNAVAILABLE, "Unhealthy\n"),
        "/health" => respond(StatusCode::OK, ""),
        "/v1/models" => {
            let body = serde_json::json!({
                "object": "list",
                "data": [{ "id": args.model, "object": "model", "seed": args.seed }],
            });
            respond(StatusCode::OK, body.to_string())
        }
        _ => respond(StatusCode::NOT_FOUND, "Not Found\n"),
    }
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}
