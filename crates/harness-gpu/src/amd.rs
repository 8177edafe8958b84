//! AMD telemetry through the amdgpu sysfs interface.
//!
//! Each amdgpu card exposes `device/mem_info_vram_used` (bytes) under
//! `/sys/class/drm/cardN`. Device index `i` is the `i`-th AMD card in
//! ascending card-number order.

use std::fs;
use std::path::{Path, PathBuf};

use harness_common::{HarnessError, Result};
use tracing::debug;

use crate::backend::{TelemetryBackend, TelemetrySession};

const BACKEND_NAME: &str = "amdgpu-sysfs";
const DRM_ROOT: &str = "/sys/class/drm";
const AMD_PCI_VENDOR: &str = "0x1002";

#[derive(Debug, Clone)]
pub struct AmdSysfsBackend {
    drm_root: PathBuf,
}

impl Default for AmdSysfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AmdSysfsBackend {
    pub fn new() -> Self {
        Self::with_root(DRM_ROOT)
    }

    /// Read cards from a different DRM directory.
    pub fn with_root(drm_root: impl Into<PathBuf>) -> Self {
        Self {
            drm_root: drm_root.into(),
        }
    }
}

impl TelemetryBackend for AmdSysfsBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn open(&self) -> Result<Box<dyn TelemetrySession + '_>> {
        let cards = discover_cards(&self.drm_root)?;
        debug!("Found {} amdgpu card(s) under {}", cards.len(), self.drm_root.display());
        Ok(Box::new(AmdSysfsSession { cards }))
    }
}

struct AmdSysfsSession {
    /// `device` directories of AMD cards, indexed by device number.
    cards: Vec<PathBuf>,
}

impl TelemetrySession for AmdSysfsSession {
    fn sample_used_bytes(&self, device: u32) -> Result<u64> {
        let card = self.cards.get(device as usize).ok_or_else(|| {
            HarnessError::telemetry(
                BACKEND_NAME,
                format!("device {} not found ({} card(s))", device, self.cards.len()),
            )
        })?;
        let path = card.join("mem_info_vram_used");
        let raw = fs::read_to_string(&path).map_err(|e| {
            HarnessError::telemetry(BACKEND_NAME, format!("{}: {}", path.display(), e))
        })?;
        raw.trim().parse::<u64>().map_err(|e| {
            HarnessError::telemetry(BACKEND_NAME, format!("{}: {:?}: {}", path.display(), raw.trim(), e))
        })
    }

    fn device_count(&self) -> Result<u32> {
        Ok(self.cards.len() as u32)
    }
}

fn discover_cards(drm_root: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(drm_root).map_err(|e| {
        HarnessError::telemetry(BACKEND_NAME, format!("{}: {}", drm_root.display(), e))
    })?;

    let mut cards: Vec<(u32, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            // Skips connector entries such as `card0-DP-1`.
            let index = name.strip_prefix("card")?.parse::<u32>().ok()?;
            let device_dir = entry.path().join("device");
            let vendor = fs::read_to_string(device_dir.join("vendor")).ok()?;
            (vendor.trim() == AMD_PCI_VENDOR).then_some((index, device_dir))
        })
        .collect();

    cards.sort_by_key(|(index, _)| *index);
    Ok(cards.into_iter().map(|(_, dir)| dir).collect())
}
