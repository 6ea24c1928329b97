// Allow uppercase acronyms for industry-standard terms like HPA, DCO, NVMe
#![allow(clippy::upper_case_acronyms)]

pub mod cert;
pub mod crypto;
pub mod dispatch;
pub mod hidden;
pub mod orchestrator;
pub mod progress;
pub mod safety;
pub mod verify;

// Re-export the orchestrator entry points for convenience
pub use orchestrator::{wipe_device, WipeOrchestrator, WipeReport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy for the wipe engine.
///
/// Every variant is returned as a typed result to the caller; nothing is
/// logged-and-ignored at the orchestrator level. `Cancelled` is not a fault:
/// it still produces an INCOMPLETE certificate.
#[derive(Error, Debug)]
pub enum WipeError {
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("hidden-area detection failed: {0}")]
    DetectionFailed(String),

    #[error("hidden-area removal failed: {0}")]
    RemovalFailed(String),

    #[error("erase pass {pass} failed: {detail}")]
    EraseFailed { pass: u32, detail: String },

    #[error("operation cancelled by caller")]
    Cancelled,

    #[error("verification inconclusive: {0}")]
    VerificationInconclusive(String),

    #[error("certificate signing failed: {0}")]
    CertificateSigningFailed(String),

    #[error("device busy: {0}")]
    DeviceBusy(String),

    #[error("device missing: {0}")]
    DeviceMissing(String),

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WipeResult<T> = Result<T, WipeError>;

/// Media class of the target device. Drives the pass plan and the
/// verification expectation profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaClass {
    Rotational,
    Ssd,
    Nvme,
    Removable,
}

/// Immutable snapshot of the target device, taken at operation start.
///
/// The snapshot is re-validated before each destructive step because a device
/// can be unplugged mid-operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Platform path, e.g. `/dev/sda`. Also the key of the per-device lock.
    pub path: String,
    pub total_sectors: u64,
    pub sector_size: u32,
    pub media_class: MediaClass,
    pub is_system_disk: bool,
    pub model: String,
    pub serial: String,
}

impl Device {
    pub fn capacity_bytes(&self) -> u64 {
        self.total_sectors * self.sector_size as u64
    }

    /// Check that the device is still present. Block devices and the test
    /// files standing in for them both answer to a path existence check.
    pub fn revalidate(&self) -> WipeResult<()> {
        if std::path::Path::new(&self.path).exists() {
            Ok(())
        } else {
            Err(WipeError::DeviceMissing(self.path.clone()))
        }
    }
}

pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Erasure method requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WipeMethod {
    /// Single-pass zero fill
    Zero,
    /// Cryptographically random fill
    Random,
    /// DoD 5220.22-M 3-pass (zeros, ones, random)
    DoD5220,
    /// Gutmann-style 35-pass schedule
    Gutmann,
    /// Hardware secure erase. Always exactly one pass, exclusive of
    /// software overwrite passes.
    SecureErase,
}

impl WipeMethod {
    /// Pass count fixed by the method, or `None` when the request chooses.
    pub fn fixed_pass_count(&self) -> Option<u32> {
        match self {
            WipeMethod::DoD5220 => Some(3),
            WipeMethod::Gutmann => Some(35),
            WipeMethod::SecureErase => Some(1),
            WipeMethod::Zero | WipeMethod::Random => None,
        }
    }

    /// NIST SP 800-88 sanitization category recorded in certificates.
    pub fn sanitization_category(&self) -> &'static str {
        match self {
            WipeMethod::SecureErase => "Purge",
            _ => "Clear",
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, WipeMethod::SecureErase)
    }
}

impl std::fmt::Display for WipeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WipeMethod::Zero => "zero",
            WipeMethod::Random => "random",
            WipeMethod::DoD5220 => "dod5220",
            WipeMethod::Gutmann => "gutmann",
            WipeMethod::SecureErase => "secure-erase",
        };
        f.write_str(name)
    }
}

/// Two-factor override for wiping a system-critical device.
///
/// The second token must differ from the primary confirmation token; a reused
/// token counts as a single factor and is denied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemOverride {
    pub second_token: String,
}

/// A single wipe request. Owned exclusively by the orchestrator for the
/// duration of the operation; produces exactly one certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WipeRequest {
    pub device: Device,
    pub method: WipeMethod,
    /// Requested pass count (>= 1). Methods with a fixed schedule reject a
    /// mismatching value instead of silently correcting it.
    pub passes: u32,
    pub verify: bool,
    pub remove_hidden_areas: bool,
    /// When set, a hidden-area detection or removal failure is fatal instead
    /// of a recorded warning.
    pub require_hidden_clearance: bool,
    /// DCO removal is destructive to drive identity and never implicit.
    pub allow_dco_removal: bool,
    /// Best-effort opt-in: continue past a failed pass. Off by default
    /// because a skipped pass voids the erasure guarantee the certificate
    /// attests to.
    pub tolerate_pass_failure: bool,
    pub confirmation_token: String,
    pub system_override: Option<SystemOverride>,
    pub operator_id: Option<String>,
    /// SHA-256 digests of known pre-wipe content, checked during
    /// verification sampling.
    pub prewipe_digests: Vec<String>,
}

impl WipeRequest {
    /// Minimal well-formed request for a device; callers adjust fields.
    pub fn new(device: Device, method: WipeMethod, confirmation_token: impl Into<String>) -> Self {
        let passes = method.fixed_pass_count().unwrap_or(1);
        Self {
            device,
            method,
            passes,
            verify: true,
            remove_hidden_areas: false,
            require_hidden_clearance: false,
            allow_dco_removal: false,
            tolerate_pass_failure: false,
            confirmation_token: confirmation_token.into(),
            system_override: None,
            operator_id: None,
            prewipe_digests: Vec::new(),
        }
    }
}

/// Tool bundling edition. Injected into the dispatcher/inspector bindings at
/// construction; the core pipeline never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edition {
    Lite,
    Complete,
}

/// Engine-level tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub edition: Edition,
    /// Per-pass timeout. A timeout yields a FAILED PassResult, never a hang.
    pub pass_timeout_secs: u64,
    /// Write chunk size; also the cooperative cancellation granularity.
    pub chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            edition: Edition::Complete,
            pass_timeout_secs: 3600,
            chunk_size: 4 * 1024 * 1024,
        }
    }
}

/// Lifecycle states of a wipe operation. `Failed` is reachable from any
/// non-terminal state; `Aborted` only via cancellation from `Erasing` or
/// `Verifying`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WipeState {
    Pending,
    Authorizing,
    DetectingHidden,
    RemovingHidden,
    Erasing,
    Verifying,
    Certifying,
    Done,
    Failed,
    Aborted,
}

impl WipeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WipeState::Done | WipeState::Failed | WipeState::Aborted)
    }
}

/// Timestamp helper used across pass results and certificates.
pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
