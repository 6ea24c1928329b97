// HiddenAreaInspector - HPA/DCO detection arithmetic and removal gating.
//
// A naive wipe that honors the current max address leaves the Host Protected
// Area and anything hidden by a Device Configuration Overlay untouched. The
// inspector derives both from three raw sector counts supplied by a platform
// binding and verifies removals by re-detecting instead of trusting the tool.

use crate::{Device, WipeError, WipeResult};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Platform boundary. Concrete bindings query ATA/NVMe identification
/// (hdparm -N, dco-identify and friends) and issue the matching clear
/// commands; the core only consumes the numbers.
pub trait SectorCountSource: Send + Sync {
    /// Returns `(native_max, current_max, physical)` sector counts.
    fn read_sector_counts(&self, device: &Device) -> anyhow::Result<(u64, u64, u64)>;

    /// Raise the current max address to the native max (HPA removal).
    fn clear_hpa(&self, device: &Device) -> anyhow::Result<()>;

    /// Restore the full physical capacity (DCO removal). Typically
    /// permanent.
    fn clear_dco(&self, device: &Device) -> anyhow::Result<()>;
}

/// Binding used when no platform support is wired in: every query fails, so
/// detection reports "unknown" rather than "absent".
pub struct UnsupportedSectorSource;

impl SectorCountSource for UnsupportedSectorSource {
    fn read_sector_counts(&self, _device: &Device) -> anyhow::Result<(u64, u64, u64)> {
        anyhow::bail!("no platform sector-count binding configured")
    }

    fn clear_hpa(&self, _device: &Device) -> anyhow::Result<()> {
        anyhow::bail!("no platform HPA binding configured")
    }

    fn clear_dco(&self, _device: &Device) -> anyhow::Result<()> {
        anyhow::bail!("no platform DCO binding configured")
    }
}

/// Validated sector-count triple with the derived HPA/DCO arithmetic.
///
/// Construction enforces `current <= native <= physical`; a triple violating
/// that is reported as an error, never clamped into plausibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenAreaReport {
    pub native_max_sectors: u64,
    pub current_max_sectors: u64,
    pub physical_sectors: u64,
}

impl HiddenAreaReport {
    pub fn new(native: u64, current: u64, physical: u64) -> WipeResult<Self> {
        if current > native {
            return Err(WipeError::DetectionFailed(format!(
                "current max {} exceeds native max {}",
                current, native
            )));
        }
        if native > physical {
            return Err(WipeError::DetectionFailed(format!(
                "native max {} exceeds physical capacity {}",
                native, physical
            )));
        }
        Ok(Self {
            native_max_sectors: native,
            current_max_sectors: current,
            physical_sectors: physical,
        })
    }

    pub fn hpa_present(&self) -> bool {
        self.native_max_sectors > self.current_max_sectors
    }

    pub fn hpa_sectors(&self) -> u64 {
        self.native_max_sectors - self.current_max_sectors
    }

    pub fn dco_present(&self) -> bool {
        self.physical_sectors > self.native_max_sectors
    }

    pub fn dco_sectors(&self) -> u64 {
        self.physical_sectors - self.native_max_sectors
    }

    pub fn hidden_bytes(&self, sector_size: u32) -> u64 {
        (self.hpa_sectors() + self.dco_sectors()) * sector_size as u64
    }
}

pub struct HiddenAreaInspector {
    source: Arc<dyn SectorCountSource>,
}

impl HiddenAreaInspector {
    pub fn new(source: Arc<dyn SectorCountSource>) -> Self {
        Self { source }
    }

    /// Detect hidden areas. The raw query is retried once; after that the
    /// failure is surfaced so the orchestrator can treat the state as
    /// unknown.
    pub fn detect(&self, device: &Device) -> WipeResult<HiddenAreaReport> {
        let (native, current, physical) = match self.source.read_sector_counts(device) {
            Ok(counts) => counts,
            Err(first) => {
                warn!("sector-count query failed, retrying once: {}", first);
                self.source
                    .read_sector_counts(device)
                    .map_err(|e| WipeError::DetectionFailed(e.to_string()))?
            }
        };
        let report = HiddenAreaReport::new(native, current, physical)?;
        if report.hpa_present() {
            info!(
                "HPA on {}: {} sectors hidden",
                device.path,
                report.hpa_sectors()
            );
        }
        if report.dco_present() {
            info!(
                "DCO on {}: {} sectors hidden",
                device.path,
                report.dco_sectors()
            );
        }
        Ok(report)
    }

    /// Remove the HPA and re-detect. The removal counts as failed if the HPA
    /// is still present afterwards, whatever the tool claimed.
    pub fn remove_hpa(
        &self,
        device: &Device,
        report: &HiddenAreaReport,
    ) -> WipeResult<HiddenAreaReport> {
        if !report.hpa_present() {
            return Ok(report.clone());
        }
        self.source
            .clear_hpa(device)
            .map_err(|e| WipeError::RemovalFailed(format!("HPA removal: {}", e)))?;
        let after = self.detect(device)?;
        if after.hpa_present() {
            return Err(WipeError::RemovalFailed(format!(
                "HPA still present after removal ({} sectors)",
                after.hpa_sectors()
            )));
        }
        Ok(after)
    }

    /// Remove the DCO and re-detect. Destructive to drive identity, so it
    /// requires the explicit force flag and is never attempted implicitly.
    pub fn remove_dco(
        &self,
        device: &Device,
        report: &HiddenAreaReport,
        force: bool,
    ) -> WipeResult<HiddenAreaReport> {
        if !report.dco_present() {
            return Ok(report.clone());
        }
        if !force {
            return Err(WipeError::RemovalFailed(
                "DCO removal requires the explicit force flag".to_string(),
            ));
        }
        self.source
            .clear_dco(device)
            .map_err(|e| WipeError::RemovalFailed(format!("DCO removal: {}", e)))?;
        let after = self.detect(device)?;
        if after.dco_present() {
            return Err(WipeError::RemovalFailed(format!(
                "DCO still present after removal ({} sectors)",
                after.dco_sectors()
            )));
        }
        Ok(after)
    }
}
