// VerificationEngine - post-wipe statistical sampling and verdicts.
//
// Entropy alone cannot prove erasure: a block of one repeated non-zero byte
// has near-zero entropy and an untouched drive full of compressed data has
// high entropy. Samples are therefore scored twice, by byte-frequency Shannon
// entropy and by exact-byte comparison against known signatures, and the
// verdict applies whichever criterion the wipe method calls for. A zero fill
// is judged by pattern equality; a random fill by entropy plus the absence of
// any signature match. The criteria used are recorded in the verdict so the
// certificate states which definition of success it attests to.


use crate::crypto::sha256_hex;
use crate::{Device, WipeError, WipeMethod, WipeResult};
use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

/// Success criterion for a wipe method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Expectation {
    /// High-entropy content expected; any known signature is a failure.
    RandomFill,
    /// Every sampled byte must equal the fill byte.
    FixedPattern(u8),
}

/// Sampling geometry and thresholds. Defaults follow the engine's shipped
/// policy; everything here is configurable and everything here is recorded in
/// the verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPolicy {
    pub sample_count: usize,
    pub sample_len: usize,
    /// Fraction of samples placed at random offsets to deter pattern-aware
    /// defeat; the rest are stratified.
    pub random_fraction: f64,
    /// Mean-entropy floor for `RandomFill`; below it the verdict is SUSPECT
    /// even without a signature match.
    pub min_mean_entropy: f64,
    pub expectation: Expectation,
    /// SHA-256 digests of known pre-wipe sample content. An exact digest
    /// match is always a failure, whatever the expectation.
    pub prewipe_digests: Vec<String>,
}

impl VerifyPolicy {
    pub fn random_fill() -> Self {
        Self {
            sample_count: 32,
            sample_len: 4096,
            random_fraction: 0.25,
            min_mean_entropy: 7.5,
            expectation: Expectation::RandomFill,
            prewipe_digests: Vec::new(),
        }
    }

    pub fn fixed_pattern(byte: u8) -> Self {
        Self {
            expectation: Expectation::FixedPattern(byte),
            ..Self::random_fill()
        }
    }

    /// Default policy for a wipe method. Zero fill and device-native secure
    /// erase leave uniform zeros; every other shipped method ends on a
    /// random pass.
    pub fn for_method(method: WipeMethod) -> Self {
        match method {
            WipeMethod::Zero | WipeMethod::SecureErase => Self::fixed_pattern(0x00),
            WipeMethod::Random | WipeMethod::DoD5220 | WipeMethod::Gutmann => Self::random_fill(),
        }
    }

    pub fn with_prewipe_digests(mut self, digests: Vec<String>) -> Self {
        self.prewipe_digests = digests;
        self
    }
}

/// One scored sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSample {
    pub offset: u64,
    pub len: usize,
    /// Shannon entropy in bits/byte, 0 for constant data, 8 for ideal random.
    pub entropy: f64,
    /// Name of the matched signature, if any (informational; whether a match
    /// fails the verdict depends on the expectation).
    pub matched_signature: Option<String>,
    pub digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictClass {
    Pass,
    Suspect,
    Fail,
}

/// Aggregate verdict over all samples, carrying the policy that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub classification: VerdictClass,
    pub mean_entropy: f64,
    pub min_entropy: f64,
    /// Samples that violated the expectation (signature/residue/pre-wipe).
    pub pattern_matches: u32,
    pub unreadable_samples: u32,
    /// Set when sampling could not fully read the device; a verdict with
    /// this flag is never PASS.
    pub inconclusive: bool,
    pub expectation: Expectation,
    pub min_mean_entropy: f64,
    pub samples: Vec<VerificationSample>,
}

impl VerificationVerdict {
    /// Placeholder verdict for a verification that could not run at all.
    /// Forced to SUSPECT, never silently upgraded.
    pub fn inconclusive(policy: &VerifyPolicy) -> Self {
        Self {
            classification: VerdictClass::Suspect,
            mean_entropy: 0.0,
            min_entropy: 0.0,
            pattern_matches: 0,
            unreadable_samples: 0,
            inconclusive: true,
            expectation: policy.expectation,
            min_mean_entropy: policy.min_mean_entropy,
            samples: Vec::new(),
        }
    }
}

pub struct VerificationEngine {
    policy: VerifyPolicy,
}

impl VerificationEngine {
    pub fn new(policy: VerifyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &VerifyPolicy {
        &self.policy
    }

    /// Sample the written extent and classify the result.
    ///
    /// Errors only when the device cannot be read at all; partially
    /// unreadable devices produce an inconclusive (SUSPECT-floored) verdict
    /// instead.
    pub fn verify(&self, device: &Device, written_extent: u64) -> WipeResult<VerificationVerdict> {
        if written_extent == 0 {
            return Err(WipeError::VerificationInconclusive(
                "written extent is empty".to_string(),
            ));
        }
        let mut file = File::open(&device.path).map_err(|e| {
            WipeError::VerificationInconclusive(format!("cannot open {}: {}", device.path, e))
        })?;

        let sample_len = (self.policy.sample_len as u64).min(written_extent) as usize;
        let offsets = self.sample_offsets(written_extent, sample_len as u64);

        let mut samples = Vec::with_capacity(offsets.len());
        let mut unreadable = 0u32;
        let mut buffer = vec![0u8; sample_len];

        for offset in offsets {
            let read = file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| file.read_exact(&mut buffer));
            if let Err(e) = read {
                warn!("sample at byte {} unreadable: {}", offset, e);
                unreadable += 1;
                continue;
            }
            samples.push(VerificationSample {
                offset,
                len: sample_len,
                entropy: shannon_entropy(&buffer),
                matched_signature: self.match_signature(&buffer),
                digest: sha256_hex(&buffer),
            });
        }

        Ok(self.classify(samples, unreadable))
    }

    /// Stratified offsets: first sector, last sector, evenly spaced interior
    /// points, plus `random_fraction` of randomly placed samples.
    pub(crate) fn sample_offsets(&self, extent: u64, sample_len: u64) -> Vec<u64> {
        let last = extent.saturating_sub(sample_len);
        if last == 0 {
            return vec![0];
        }

        let count = self.policy.sample_count.max(2);
        let random_count = ((count as f64) * self.policy.random_fraction).round() as usize;
        let stratified_count = (count - random_count).max(2);

        let mut offsets = Vec::with_capacity(count);
        for i in 0..stratified_count {
            offsets.push(last * i as u64 / (stratified_count - 1) as u64);
        }

        let mut rng = rand::thread_rng();
        for _ in 0..random_count {
            offsets.push(rng.gen_range(0..=last));
        }
        offsets
    }

    /// Exact-byte signature comparison. Entropy is necessary but not
    /// sufficient; these matches are what distinguish "uniform fill" from
    /// "random data" and "leftover content" from noise.
    fn match_signature(&self, data: &[u8]) -> Option<String> {
        if self.policy.prewipe_digests.contains(&sha256_hex(data)) {
            return Some("pre-wipe-content".to_string());
        }
        let first = *data.first()?;
        if data.iter().all(|&b| b == first) {
            return Some(match first {
                0x00 => "all-zero".to_string(),
                0xFF => "all-one".to_string(),
                other => format!("constant-byte:{:02x}", other),
            });
        }
        if matches_rotation(data, &TEST_PATTERN) {
            return Some("test-pattern".to_string());
        }
        None
    }

    fn classify(&self, samples: Vec<VerificationSample>, unreadable: u32) -> VerificationVerdict {
        let readable = samples.len();
        let mean_entropy = if readable > 0 {
            samples.iter().map(|s| s.entropy).sum::<f64>() / readable as f64
        } else {
            0.0
        };
        let min_entropy = samples
            .iter()
            .map(|s| s.entropy)
            .fold(f64::INFINITY, f64::min);
        let min_entropy = if min_entropy.is_finite() { min_entropy } else { 0.0 };

        let offending = |sample: &VerificationSample| -> bool {
            match self.policy.expectation {
                Expectation::RandomFill => sample.matched_signature.is_some(),
                Expectation::FixedPattern(byte) => match sample.matched_signature.as_deref() {
                    Some("pre-wipe-content") => true,
                    // The expected uniform fill matches its own constant
                    // signature; only a different constant is residue
                    Some(_) => !is_expected_constant(sample, byte),
                    // Mixed content cannot be the uniform fill
                    None => true,
                },
            }
        };
        let pattern_matches = samples.iter().filter(|s| offending(s)).count() as u32;

        let inconclusive = unreadable > 0 || readable == 0;
        let classification = if pattern_matches > 0 {
            VerdictClass::Fail
        } else if inconclusive {
            VerdictClass::Suspect
        } else {
            match self.policy.expectation {
                Expectation::RandomFill if mean_entropy < self.policy.min_mean_entropy => {
                    VerdictClass::Suspect
                }
                _ => VerdictClass::Pass,
            }
        };

        VerificationVerdict {
            classification,
            mean_entropy,
            min_entropy,
            pattern_matches,
            unreadable_samples: unreadable,
            inconclusive,
            expectation: self.policy.expectation,
            min_mean_entropy: self.policy.min_mean_entropy,
            samples,
        }
    }
}

/// Rotating low-entropy pattern written by pre-wipe capability tests; finding
/// it after a wipe means the wipe never touched the sample.
const TEST_PATTERN: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

fn is_expected_constant(sample: &VerificationSample, byte: u8) -> bool {
    match sample.matched_signature.as_deref() {
        Some("all-zero") => byte == 0x00,
        Some("all-one") => byte == 0xFF,
        Some(sig) => sig
            .strip_prefix("constant-byte:")
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .map(|b| b == byte)
            .unwrap_or(false),
        None => false,
    }
}

/// True when `data` is `pattern` repeated at any rotation.
fn matches_rotation(data: &[u8], pattern: &[u8]) -> bool {
    if data.len() < pattern.len() {
        return false;
    }
    (0..pattern.len()).any(|phase| {
        data.iter()
            .enumerate()
            .all(|(i, &b)| b == pattern[(phase + i) % pattern.len()])
    })
}

/// Byte-frequency Shannon entropy in bits per byte.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut frequency = [0u64; 256];
    for &byte in data {
        frequency[byte as usize] += 1;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &frequency {
        if count > 0 {
            let probability = count as f64 / len;
            entropy -= probability * probability.log2();
        }
    }
    entropy
}
