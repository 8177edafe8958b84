// NVIDIA telemetry through NVML

use harness_common::{HarnessError, Result};
use nvml_wrapper::Nvml;
use tracing::debug;

use crate::backend::{TelemetryBackend, TelemetrySession};

const BACKEND_NAME: &str = "nvml";

#[derive(Debug, Default, Clone, Copy)]
pub struct NvmlBackend;

impl NvmlBackend {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryBackend for NvmlBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn open(&self) -> Result<Box<dyn TelemetrySession + '_>> {
        let nvml = Nvml::init()
            .map_err(|e| HarnessError::telemetry(BACKEND_NAME, format!("init failed: {}", e)))?;
        debug!("NVML initialized");
        Ok(Box::new(NvmlSession { nvml }))
    }
}

/// NVML is shut down when the wrapped handle drops.
struct NvmlSession {
    nvml: Nvml,
}

impl TelemetrySession for NvmlSession {
    fn sample_used_bytes(&self, device: u32) -> Result<u64> {
        let handle = self.nvml.device_by_index(device).map_err(|e| {
            HarnessError::telemetry(BACKEND_NAME, format!("device {}: {}", device, e))
        })?;
        let info = handle.memory_info().map_err(|e| {
            HarnessError::telemetry(BACKEND_NAME, format!("memory info for device {}: {}", device, e))
        })?;
        Ok(info.used)
    }

    fn device_count(&self) -> Result<u32> {
        self.nvml
            .device_count()
            .map_err(|e| HarnessError::telemetry(BACKEND_NAME, format!("device count: {}", e)))
    }
}

impl Drop for NvmlSession {
    fn drop(&mut self) {
        debug!("NVML session closed");
    }
}
