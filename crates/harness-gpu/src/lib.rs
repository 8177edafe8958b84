//! # Harness GPU
//!
//! Waits for accelerator memory to drain between tests.
//!
//! Memory is read through a [`TelemetryBackend`], picked once per process
//! from the environment ([`GpuVendor::current`]):
//! - NVIDIA devices through NVML
//! - AMD devices through the amdgpu sysfs interface
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use harness_gpu::wait_for_gpu_memory_to_clear;
//!
//! // Block until devices 0 and 1 use at most 2 GiB each.
//! wait_for_gpu_memory_to_clear(&[0, 1], 2 << 30, Duration::from_secs(120))?;
//! # Ok::<(), harness_common::HarnessError>(())
//! ```

pub mod amd;
pub mod backend;
pub mod nvidia;
pub mod waiter;

pub use amd::AmdSysfsBackend;
pub use backend::{default_backend, GpuVendor, TelemetryBackend, TelemetrySession, GPU_VENDOR_ENV};
pub use nvidia::NvmlBackend;
pub use waiter::{wait_for_gpu_memory_to_clear, QuiescenceWaiter, DEFAULT_QUIESCENCE_POLL_INTERVAL};
