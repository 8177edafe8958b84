//! Telemetry strategy traits and vendor selection.

use std::env;
use std::fmt;
use std::path::Path;

use harness_common::Result;
use lazy_static::lazy_static;
use tracing::{debug, warn};

use crate::amd::AmdSysfsBackend;
use crate::nvidia::NvmlBackend;

/// Forces the telemetry backend: `nvidia` or `amd`.
pub const GPU_VENDOR_ENV: &str = "HARNESS_GPU_VENDOR";

/// A source of device memory readings.
///
/// Opening a backend yields a session. The session is the scoped
/// "initialized" state of the vendor library: dropping it is the shutdown.
pub trait TelemetryBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self) -> Result<Box<dyn TelemetrySession + '_>>;
}

/// An initialized telemetry library.
pub trait TelemetrySession {
    /// Bytes of device memory currently in use on `device`.
    fn sample_used_bytes(&self, device: u32) -> Result<u64>;

    /// Number of devices visible to this session.
    fn device_count(&self) -> Result<u32>;
}

/// GPU vendor the current process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
}

lazy_static! {
    static ref CURRENT_VENDOR: GpuVendor = GpuVendor::detect();
}

impl GpuVendor {
    /// Vendor for this process. Detected on first use and fixed afterwards.
    pub fn current() -> GpuVendor {
        *CURRENT_VENDOR
    }

    /// Parse an override value (`nvidia`/`cuda`, `amd`/`rocm`).
    pub fn parse(value: &str) -> Option<GpuVendor> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nvidia" | "cuda" => Some(GpuVendor::Nvidia),
            "amd" | "rocm" => Some(GpuVendor::Amd),
            _ => None,
        }
    }

    fn detect() -> GpuVendor {
        if let Ok(value) = env::var(GPU_VENDOR_ENV) {
            match GpuVendor::parse(&value) {
                Some(vendor) => {
                    debug!("GPU vendor forced by {}: {}", GPU_VENDOR_ENV, vendor);
                    return vendor;
                }
                None => warn!("Ignoring unknown {} value: {:?}", GPU_VENDOR_ENV, value),
            }
        }

        let vendor = if rocm_present() {
            GpuVendor::Amd
        } else {
            GpuVendor::Nvidia
        };
        debug!("Detected GPU vendor: {}", vendor);
        vendor
    }

    pub fn backend(self) -> Box<dyn TelemetryBackend> {
        match self {
            GpuVendor::Nvidia => Box::new(NvmlBackend::new()),
            GpuVendor::Amd => Box::new(AmdSysfsBackend::new()),
        }
    }
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuVendor::Nvidia => write!(f, "nvidia"),
            GpuVendor::Amd => write!(f, "amd"),
        }
    }
}

fn rocm_present() -> bool {
    env::var_os("ROCM_PATH").is_some()
        || Path::new("/opt/rocm").exists()
        || Path::new("/sys/module/amdgpu").exists()
}

/// Backend for [`GpuVendor::current`].
pub fn default_backend() -> Box<dyn TelemetryBackend> {
    GpuVendor::current().backend()
}
