// EraseDispatcher boundary - pass planning and execution.
//
// The core never builds shell command strings. It hands structured PassSpec
// values across this boundary; concrete bindings either drive platform tools
// (hdparm secure-erase, nvme sanitize, blkdiscard) or, for the software
// overwrite binding shipped here, write the pattern through ordinary file
// I/O.

pub mod overwrite;

pub use overwrite::OverwriteDispatcher;

use crate::progress::{CancelToken, ProgressSink};
use crate::{Device, MediaClass, WipeMethod, WipeRequest, WipeError, WipeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Data source for one overwrite sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassPattern {
    Zeros,
    Ones,
    Random,
    /// Repeating byte sequence, e.g. the MFM/RLL-targeted Gutmann patterns.
    Literal(Vec<u8>),
    /// Device-native secure erase; the binding owns the mechanism.
    SecureErase,
}

impl PassPattern {
    pub fn label(&self) -> String {
        match self {
            PassPattern::Zeros => "zeros".to_string(),
            PassPattern::Ones => "ones".to_string(),
            PassPattern::Random => "random".to_string(),
            PassPattern::Literal(bytes) => {
                let hex: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                format!("literal:{}", hex.join(""))
            }
            PassPattern::SecureErase => "secure-erase".to_string(),
        }
    }
}

/// One scheduled pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassSpec {
    /// 0-based position in the plan.
    pub index: u32,
    pub pattern: PassPattern,
    pub description: String,
    pub estimated_secs: u64,
}

/// Ordered pass schedule for a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassPlan {
    pub method: WipeMethod,
    pub target_bytes: u64,
    pub passes: Vec<PassSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassOutcome {
    Success,
    /// Cancelled mid-pass; `bytes_written` is the offset actually reached.
    Partial,
    Failed,
}

/// Immutable record of one executed pass. Appended in order, never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassResult {
    pub index: u32,
    pub pattern: String,
    pub bytes_written: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: PassOutcome,
    pub error: Option<String>,
}

impl PassResult {
    /// Synthesized result for a pass that never reported back (timeout).
    pub fn failed(spec: &PassSpec, detail: impl Into<String>) -> Self {
        let now = crate::now_utc();
        Self {
            index: spec.index,
            pattern: spec.pattern.label(),
            bytes_written: 0,
            started_at: now,
            ended_at: now,
            outcome: PassOutcome::Failed,
            error: Some(detail.into()),
        }
    }
}

/// The erase capability consumed by the orchestrator.
///
/// `execute` never returns `Err`: failures, timeouts and cancellations are
/// all encoded in the `PassResult` outcome so verification can scope itself
/// to the bytes actually overwritten.
pub trait EraseDispatcher: Send + Sync {
    fn plan(&self, request: &WipeRequest, device: &Device) -> WipeResult<PassPlan>;

    fn execute(
        &self,
        spec: &PassSpec,
        plan: &PassPlan,
        device: &Device,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> PassResult;
}

/// Gutmann's 1996 schedule: passes 1-4 and 32-35 random, 5-31 fixed patterns
/// targeting MFM and RLL (2,7) encodings.
const GUTMANN_SCHEDULE: &[Option<&[u8]>; 35] = &[
    None,
    None,
    None,
    None,
    Some(&[0x55]),
    Some(&[0xAA]),
    Some(&[0x92, 0x49, 0x24]),
    Some(&[0x49, 0x24, 0x92]),
    Some(&[0x24, 0x92, 0x49]),
    Some(&[0x00]),
    Some(&[0x11]),
    Some(&[0x22]),
    Some(&[0x33]),
    Some(&[0x44]),
    Some(&[0x55]),
    Some(&[0x66]),
    Some(&[0x77]),
    Some(&[0x88]),
    Some(&[0x99]),
    Some(&[0xAA]),
    Some(&[0xBB]),
    Some(&[0xCC]),
    Some(&[0xDD]),
    Some(&[0xEE]),
    Some(&[0xFF]),
    Some(&[0x92, 0x49, 0x24]),
    Some(&[0x49, 0x24, 0x92]),
    Some(&[0x24, 0x92, 0x49]),
    Some(&[0x6D, 0xB6, 0xDB]),
    Some(&[0xB6, 0xDB, 0x6D]),
    Some(&[0xDB, 0x6D, 0xB6]),
    None,
    None,
    None,
    None,
];

/// Rough sequential write throughput per media class, for duration estimates
/// only.
fn estimated_throughput(media_class: MediaClass) -> u64 {
    match media_class {
        MediaClass::Rotational => 120 * 1024 * 1024,
        MediaClass::Ssd => 350 * 1024 * 1024,
        MediaClass::Nvme => 900 * 1024 * 1024,
        MediaClass::Removable => 40 * 1024 * 1024,
    }
}

/// Build the normalized pass schedule for a request, validating
/// method/media/pass-count compatibility.
pub fn build_plan(request: &WipeRequest, device: &Device) -> WipeResult<PassPlan> {
    if request.passes == 0 {
        return Err(WipeError::InvalidRequest(
            "pass count must be at least 1".to_string(),
        ));
    }
    if let Some(fixed) = request.method.fixed_pass_count() {
        if request.passes != fixed {
            return Err(WipeError::InvalidRequest(format!(
                "{} requires exactly {} pass(es), got {}",
                request.method, fixed, request.passes
            )));
        }
    }
    if request.method.is_hardware() && device.media_class == MediaClass::Removable {
        return Err(WipeError::InvalidRequest(
            "hardware secure erase is not available for removable media".to_string(),
        ));
    }

    let target_bytes = device.capacity_bytes();
    let overwrite_secs = (target_bytes / estimated_throughput(device.media_class)).max(1);

    let patterns: Vec<(PassPattern, String)> = match request.method {
        WipeMethod::Zero => (0..request.passes)
            .map(|i| {
                (
                    PassPattern::Zeros,
                    format!("pass {}/{}: zero fill", i + 1, request.passes),
                )
            })
            .collect(),
        WipeMethod::Random => (0..request.passes)
            .map(|i| {
                (
                    PassPattern::Random,
                    format!("pass {}/{}: random fill", i + 1, request.passes),
                )
            })
            .collect(),
        WipeMethod::DoD5220 => vec![
            (PassPattern::Zeros, "pass 1/3: zeros".to_string()),
            (PassPattern::Ones, "pass 2/3: ones".to_string()),
            (PassPattern::Random, "pass 3/3: random".to_string()),
        ],
        WipeMethod::Gutmann => GUTMANN_SCHEDULE
            .iter()
            .enumerate()
            .map(|(i, entry)| match entry {
                None => (
                    PassPattern::Random,
                    format!("pass {}/35: random", i + 1),
                ),
                Some(bytes) => {
                    let pattern = PassPattern::Literal(bytes.to_vec());
                    let label = pattern.label();
                    (pattern, format!("pass {}/35: {}", i + 1, label))
                }
            })
            .collect(),
        WipeMethod::SecureErase => vec![(
            PassPattern::SecureErase,
            "pass 1/1: device-native secure erase".to_string(),
        )],
    };

    let passes = patterns
        .into_iter()
        .enumerate()
        .map(|(i, (pattern, description))| {
            let estimated_secs = match pattern {
                // Crypto/block erase completes in firmware, not bandwidth
                PassPattern::SecureErase => 120,
                _ => overwrite_secs,
            };
            PassSpec {
                index: i as u32,
                pattern,
                description,
                estimated_secs,
            }
        })
        .collect();

    Ok(PassPlan {
        method: request.method,
        target_bytes,
        passes,
    })
}
