//! Polling device memory until it drops below a threshold.

use std::thread;
use std::time::{Duration, Instant};

use harness_common::{DeviceUsage, HarnessError, QuiescenceTarget, Result};
use tracing::{debug, info};

use crate::backend::{default_backend, TelemetryBackend, TelemetrySession};

/// Delay between memory snapshots.
pub const DEFAULT_QUIESCENCE_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct QuiescenceWaiter {
    backend: Box<dyn TelemetryBackend>,
    poll_interval: Duration,
}

impl QuiescenceWaiter {
    pub fn new(backend: Box<dyn TelemetryBackend>) -> Self {
        Self {
            backend,
            poll_interval: DEFAULT_QUIESCENCE_POLL_INTERVAL,
        }
    }

    /// Waiter on the backend for this process's GPU vendor.
    pub fn for_current_vendor() -> Self {
        Self::new(default_backend())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Block until every device in `target` is at or below the threshold in
    /// the same snapshot. Returns that snapshot.
    ///
    /// The telemetry session lives for exactly this call.
    pub fn wait(&self, target: &QuiescenceTarget) -> Result<Vec<DeviceUsage>> {
        if target.devices.is_empty() {
            debug!("No devices to wait for");
            return Ok(Vec::new());
        }

        let session = self.backend.open()?;
        let start = Instant::now();
        let deadline = start + target.timeout;

        loop {
            let usage = snapshot(session.as_ref(), &target.devices)?;
            log_snapshot(&usage);

            if target.is_satisfied_by(&usage) {
                info!(
                    "Done waiting for free GPU memory on devices {:?} ({:.1}s)",
                    target.devices,
                    start.elapsed().as_secs_f64()
                );
                return Ok(usage);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(HarnessError::ResourceNotReleased {
                    devices: target.devices.clone(),
                    threshold_bytes: target.threshold_bytes,
                    elapsed: now - start,
                    last_usage: usage,
                });
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Devices visible to the backend, `0..count`.
    pub fn all_devices(&self) -> Result<Vec<u32>> {
        let session = self.backend.open()?;
        Ok((0..session.device_count()?).collect())
    }
}

fn snapshot(session: &dyn TelemetrySession, devices: &[u32]) -> Result<Vec<DeviceUsage>> {
    devices
        .iter()
        .map(|&device| {
            Ok(DeviceUsage {
                device,
                used_bytes: session.sample_used_bytes(device)?,
            })
        })
        .collect()
}

fn log_snapshot(usage: &[DeviceUsage]) {
    let rendered: Vec<String> = usage
        .iter()
        .map(|u| format!("{}={:.2}GiB", u.device, u.used_gib()))
        .collect();
    info!("GPU memory used: {}", rendered.join(", "));
}

/// Wait on the current vendor's backend with the production poll interval.
pub fn wait_for_gpu_memory_to_clear(
    devices: &[u32],
    threshold_bytes: u64,
    timeout: Duration,
) -> Result<Vec<DeviceUsage>> {
    let target = QuiescenceTarget::new(devices.to_vec(), threshold_bytes).with_timeout(timeout);
    let waiter = QuiescenceWaiter::for_current_vendor();
    debug!("Waiting for GPU memory via {}", waiter.backend_name());
    waiter.wait(&target)
}
