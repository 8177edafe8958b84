use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use harness_common::QuiescenceTarget;
use harness_gpu::QuiescenceWaiter;
use harness_server::{RemoteServer, ServerConfig};

/// Launch model servers and check GPU state the way the test harness does
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a server, wait until it is healthy and keep it up until SIGTERM/SIGINT
    Serve {
        /// Configuration file path (YAML)
        #[arg(short, long, value_name = "FILE", conflicts_with = "model")]
        config: Option<PathBuf>,

        /// Model to serve when no configuration file is given
        #[arg(required_unless_present = "config")]
        model: Option<String>,

        /// Server binary (overrides config)
        #[arg(long)]
        binary: Option<String>,

        /// Startup timeout in seconds (overrides config)
        #[arg(long)]
        startup_timeout: Option<u64>,

        /// Extra arguments passed to the server after the model
        #[arg(last = true)]
        server_args: Vec<String>,
    },

    /// Wait until GPU memory usage drops below a threshold
    WaitGpu {
        /// Devices to watch (default: all visible devices)
        #[arg(short = 'D', long = "device", value_name = "ID")]
        devices: Vec<u32>,

        /// Threshold in GiB
        #[arg(long, default_value = "2")]
        threshold_gib: f64,

        /// Timeout in seconds
        #[arg(long, default_value = "120")]
        timeout: u64,

        /// Seconds between samples
        #[arg(long, default_value = "5")]
        interval: u64,
    },

    /// Print a free ephemeral TCP port
    FreePort,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.debug)?;

    match args.command {
        Command::Serve {
            config,
            model,
            binary,
            startup_timeout,
            server_args,
        } => {
            let mut config = match (config, model) {
                (Some(path), _) => {
                    info!("Config file: {}", path.display());
                    ServerConfig::load_from_file(&path)?
                }
                (None, Some(model)) => ServerConfig::new(model),
                (None, None) => anyhow::bail!("either --config or a model is required"),
            };
            if let Some(binary) = binary {
                config = config.binary(binary);
            }
            if let Some(secs) = startup_timeout {
                config = config.startup_timeout(Duration::from_secs(secs));
            }
            config = config.args(server_args);
            serve(config).await
        }
        Command::WaitGpu {
            devices,
            threshold_gib,
            timeout,
            interval,
        } => wait_gpu(devices, threshold_gib, timeout, interval).await,
        Command::FreePort => {
            let port = harness_process::get_open_port().context("Failed to find a free port")?;
            println!("{}", port);
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    info!("Starting server for {}", config.model);

    // Startup blocks on readiness polling.
    let server = tokio::task::spawn_blocking(move || RemoteServer::start(config))
        .await
        .context("Server start task failed")?
        .map_err(|e| {
            error!("Failed to start server: {}", e);
            anyhow::anyhow!("Start failed: {}", e)
        })?;

    info!("Server ready after {:?}", server.startup_time());
    println!("{}", server.url_root());

    setup_signal_handlers().await;

    info!("Shutting down server...");
    let status = tokio::task::spawn_blocking(move || server.stop())
        .await
        .context("Server stop task failed")?
        .map_err(|e| anyhow::anyhow!("Shutdown failed: {}", e))?;
    info!("Server stopped: {}", status);
    Ok(())
}

async fn wait_gpu(devices: Vec<u32>, threshold_gib: f64, timeout: u64, interval: u64) -> Result<()> {
    if !threshold_gib.is_finite() || threshold_gib < 0.0 {
        anyhow::bail!("threshold must be a non-negative number of GiB, got {}", threshold_gib);
    }
    let threshold_bytes = (threshold_gib * (1u64 << 30) as f64) as u64;

    tokio::task::spawn_blocking(move || -> Result<()> {
        let waiter =
            QuiescenceWaiter::for_current_vendor().with_poll_interval(Duration::from_secs(interval));
        info!("Using {} telemetry", waiter.backend_name());

        let devices = if devices.is_empty() {
            waiter.all_devices().context("Failed to enumerate devices")?
        } else {
            devices
        };
        let target = QuiescenceTarget::new(devices, threshold_bytes)
            .with_timeout(Duration::from_secs(timeout));

        let usage = waiter.wait(&target)?;
        for device in usage {
            println!("{}\t{:.2} GiB", device.device, device.used_gib());
        }
        Ok(())
    })
    .await
    .context("GPU wait task failed")?
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

async fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM signal");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT signal");
        }
    }
}
